// ==========================================
// Molecular data portal - insertion engine
// ==========================================
// Per table, in dependency order:
//   1. resolve references in memory (parent ids already on the parent sheet)
//   2. chunked multi-row inserts
//   3. returned ids joined back onto the in-memory sheet
// Upsert tables: rows deduplicated by content key, existing ids reused
// Never re-queries the store for parent ids
// ==========================================

use crate::domain::mapping::{DataMapping, ReferenceDescriptor, TableDescriptor};
use crate::domain::report::TableSummary;
use crate::domain::table::{DataTable, ImportBatch, Value};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::{chunk_size, InsertStatement, SchemaMapper, TablePlan};
use crate::repository::error::RepositoryError;
use crate::repository::import_store::ImportStore;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Result of writing one sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableOutcome {
    pub summary: TableSummary,
    /// Content-addressed rows created by this import (upsert tables only)
    pub created: usize,
    /// Content-addressed rows that already existed (upsert tables only)
    pub reused: usize,
}

pub struct InsertionEngine<'a> {
    mapping: &'a DataMapping,
    batch_size: usize,
}

impl<'a> InsertionEngine<'a> {
    pub fn new(mapping: &'a DataMapping, batch_size: usize) -> Self {
        Self {
            mapping,
            batch_size: batch_size.max(1),
        }
    }

    // ==========================================
    // Reference resolution
    // ==========================================

    /// Fills every `references` field of `alias` from its parent sheet.
    ///
    /// # Errors
    /// - `UnresolvedReference`: parent sheet absent, key without a parent
    ///   row, parent id not assigned yet, or a broadcast parent that does not
    ///   hold exactly one row
    pub fn resolve_references(&self, batch: &mut ImportBatch, alias: &str) -> ImportResult<()> {
        let Some(descriptor) = self.mapping.get(alias) else {
            return Ok(());
        };
        let Some(child) = batch.get(alias) else {
            return Ok(());
        };

        let mut resolved: Vec<(String, Vec<Value>)> = Vec::new();
        for field in &descriptor.fields {
            let Some(reference) = &field.references else {
                continue;
            };
            let values = self.resolve_one(batch, child, &field.name, reference)?;
            resolved.push((field.name.clone(), values));
        }

        if let Some(child) = batch.get_mut(alias) {
            for (column, values) in resolved {
                debug!(sheet = alias, field = %column, "reference resolved");
                child.set_column(&column, values);
            }
        }
        Ok(())
    }

    fn resolve_one(
        &self,
        batch: &ImportBatch,
        child: &DataTable,
        field: &str,
        reference: &ReferenceDescriptor,
    ) -> ImportResult<Vec<Value>> {
        let unresolved = |message: String| ImportError::UnresolvedReference {
            sheet: child.name().to_string(),
            field: field.to_string(),
            message,
        };

        let parent_alias = self
            .mapping
            .alias_for_table(&reference.table)
            .ok_or_else(|| unresolved(format!("no sheet feeds table '{}'", reference.table)))?;
        let parent = batch
            .get(parent_alias)
            .ok_or_else(|| unresolved(format!("parent sheet '{}' is not loaded", parent_alias)))?;
        if !parent.has_column(&reference.column) {
            return Err(unresolved(format!(
                "'{}.{}' has not been assigned; is '{}' inserted first?",
                parent_alias, reference.column, parent_alias
            )));
        }

        let Some(join_on) = &reference.join_on else {
            if parent.len() != 1 {
                return Err(unresolved(format!(
                    "'{}' must hold exactly one row to be referenced without joinOn, found {}",
                    parent_alias,
                    parent.len()
                )));
            }
            let value = parent
                .value(0, &reference.column)
                .cloned()
                .unwrap_or(Value::Null);
            return Ok(vec![value; child.len()]);
        };

        let index = parent.index_by(join_on);
        let mut values = Vec::with_capacity(child.len());
        for row in 0..child.len() {
            let key = child.value(row, join_on).and_then(Value::as_key);
            let parent_row = key
                .as_ref()
                .and_then(|k| index.get(k))
                .ok_or_else(|| {
                    unresolved(format!(
                        "row {}: {} {:?} has no match in '{}'",
                        row + 2,
                        join_on,
                        key.clone().unwrap_or_default(),
                        parent_alias
                    ))
                })?;
            values.push(
                parent
                    .value(*parent_row, &reference.column)
                    .cloned()
                    .unwrap_or(Value::Null),
            );
        }
        Ok(values)
    }

    // ==========================================
    // Inserts
    // ==========================================

    /// Inserts every row of `alias` and joins returned ids back onto it.
    ///
    /// # Arguments
    /// - `existing_max`: largest id before this import; only read for upsert
    ///   tables, to split reused from created entities
    pub fn insert_table<S: ImportStore + ?Sized>(
        &self,
        store: &mut S,
        batch: &mut ImportBatch,
        alias: &str,
        existing_max: i64,
    ) -> ImportResult<TableOutcome> {
        let Some(descriptor) = self.mapping.get(alias) else {
            return Ok(TableOutcome::default());
        };
        let Some(plan) = SchemaMapper::plan_for(descriptor) else {
            return Ok(TableOutcome::default());
        };
        let Some(table) = batch.get_mut(alias) else {
            return Ok(TableOutcome::default());
        };

        if plan.statement.conflict_key.is_some() {
            self.insert_content_addressed(store, table, descriptor, &plan, existing_max)
        } else {
            self.insert_plain(store, table, descriptor, &plan)
        }
    }

    fn insert_plain<S: ImportStore + ?Sized>(
        &self,
        store: &mut S,
        table: &mut DataTable,
        descriptor: &TableDescriptor,
        plan: &TablePlan,
    ) -> ImportResult<TableOutcome> {
        let rows = plan.rows(table);
        let (returned, statements) = self.insert_chunked(store, &plan.statement, &rows)?;

        if let Some(returning) = &descriptor.returning {
            if returned.len() != rows.len() {
                return Err(ImportError::store(
                    plan.statement.preview(&rows),
                    RepositoryError::UnexpectedResult(format!(
                        "{} id(s) returned for {} row(s)",
                        returned.len(),
                        rows.len()
                    )),
                ));
            }
            let ids = returned
                .into_iter()
                .map(|r| r.into_iter().next().unwrap_or(Value::Null))
                .collect();
            table.set_column(returning, ids);
        }

        info!(
            sheet = %descriptor.alias,
            table = %plan.statement.table,
            rows = rows.len(),
            statements,
            "table inserted"
        );
        Ok(TableOutcome {
            summary: summary(descriptor, plan, rows.len(), rows.len(), statements),
            created: 0,
            reused: 0,
        })
    }

    fn insert_content_addressed<S: ImportStore + ?Sized>(
        &self,
        store: &mut S,
        table: &mut DataTable,
        descriptor: &TableDescriptor,
        plan: &TablePlan,
        existing_max: i64,
    ) -> ImportResult<TableOutcome> {
        let key_field = descriptor.upsert_key.clone().unwrap_or_default();
        let key_pos = plan
            .input_fields
            .iter()
            .position(|f| *f == key_field)
            .ok_or_else(|| ImportError::invalid_mapping(
                format!("$.{}.upsertKey", descriptor.alias),
                "upsert key is not an inserted field",
            ))?;

        // one statement row per distinct content key, first occurrence wins
        let all_rows = plan.rows(table);
        let mut keys: Vec<String> = Vec::with_capacity(all_rows.len());
        let mut seen: HashSet<String> = HashSet::new();
        let mut unique_rows = Vec::new();
        for (row_idx, mut row) in all_rows.into_iter().enumerate() {
            let key = row[key_pos].as_key().ok_or_else(|| ImportError::UnresolvedReference {
                sheet: descriptor.alias.clone(),
                field: key_field.clone(),
                message: format!("row {}: content key is missing", row_idx + 2),
            })?;
            // the stored key must equal the dedup key
            if matches!(row[key_pos], Value::Text(_)) {
                row[key_pos] = Value::Text(key.clone());
            }
            if seen.insert(key.clone()) {
                unique_rows.push(row);
            }
            keys.push(key);
        }

        let (returned, statements) = self.insert_chunked(store, &plan.statement, &unique_rows)?;

        let mut ids: HashMap<String, Value> = HashMap::with_capacity(returned.len());
        let (mut created, mut reused) = (0, 0);
        for row in returned {
            let [id, key] = <[Value; 2]>::try_from(row).map_err(|row| {
                ImportError::store(
                    plan.statement.preview(&unique_rows),
                    RepositoryError::UnexpectedResult(format!(
                        "upsert returned {} column(s), expected id and key",
                        row.len()
                    )),
                )
            })?;
            match id.as_i64() {
                Some(v) if v > existing_max => created += 1,
                _ => reused += 1,
            }
            if let Some(key) = key.as_key() {
                ids.insert(key, id);
            }
        }

        if let Some(returning) = &descriptor.returning {
            let mut column = Vec::with_capacity(keys.len());
            for key in &keys {
                let id = ids.get(key).cloned().ok_or_else(|| {
                    ImportError::store(
                        plan.statement.preview(&unique_rows),
                        RepositoryError::UnexpectedResult(format!(
                            "no id returned for content key {:?}",
                            key
                        )),
                    )
                })?;
                column.push(id);
            }
            table.set_column(returning, column);
        }

        info!(
            sheet = %descriptor.alias,
            table = %plan.statement.table,
            rows = keys.len(),
            distinct = unique_rows.len(),
            created,
            reused,
            "content-addressed table upserted"
        );
        Ok(TableOutcome {
            summary: summary(descriptor, plan, keys.len(), unique_rows.len(), statements),
            created,
            reused,
        })
    }

    /// Sends `rows` in chunks, keeping row order.
    ///
    /// # Returns
    /// - returned rows of every chunk, concatenated; ids of each chunk sorted
    ///   ascending (row order) unless the statement upserts
    /// - number of statements issued
    pub fn insert_chunked<S: ImportStore + ?Sized>(
        &self,
        store: &mut S,
        statement: &InsertStatement,
        rows: &[Vec<Value>],
    ) -> ImportResult<(Vec<Vec<Value>>, usize)> {
        let size = chunk_size(self.batch_size, statement.columns.len());
        let mut returned = Vec::with_capacity(rows.len());
        let mut statements = 0;

        for chunk in rows.chunks(size) {
            let mut out = store
                .insert_rows(statement, chunk)
                .map_err(|e| ImportError::store(statement.preview(chunk), e))?;
            if statement.conflict_key.is_none() {
                out.sort_by_key(|r| r.first().and_then(Value::as_i64));
            }
            returned.append(&mut out);
            statements += 1;
            debug!(table = %statement.table, rows = chunk.len(), "chunk inserted");
        }
        Ok((returned, statements))
    }
}

fn summary(
    descriptor: &TableDescriptor,
    plan: &TablePlan,
    rows: usize,
    inserted: usize,
    statements: usize,
) -> TableSummary {
    TableSummary {
        sheet: descriptor.alias.clone(),
        table: plan.statement.table.clone(),
        rows,
        inserted,
        statements,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::mapping_loader::load_mapping_str;
    use crate::repository::import_store::memory::MemoryStore;

    const MAPPING: &str = r#"{
        "dataset": {"targetTable": "dataset", "returning": "pid", "datasetID": {}},
        "event": {"targetTable": "sampling_event", "returning": "pid",
                  "event_id_alias": {},
                  "dataset_pid": {"references": "dataset.pid"}},
        "asv": {"targetTable": "asv", "returning": "pid", "upsertKey": "DNA_sequence",
                "asv_id_alias": {"insert": false},
                "DNA_sequence": {"field": "asv_sequence"}},
        "occurrence": {"targetTable": "occurrence",
                       "event_pid": {"references": {"table": "sampling_event", "column": "pid", "joinOn": "event_id_alias"}},
                       "asv_pid": {"references": {"table": "asv", "column": "pid", "joinOn": "asv_id_alias"}},
                       "event_id_alias": {"insert": false},
                       "asv_id_alias": {"insert": false},
                       "organism_quantity": {"type": "integer"}}
    }"#;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn batch() -> ImportBatch {
        let mut batch = ImportBatch::new();
        batch.insert(DataTable::with_rows(
            "dataset",
            cols(&["datasetID"]),
            vec![vec![Value::from("ds-1")]],
        ));
        batch.insert(DataTable::with_rows(
            "event",
            cols(&["event_id_alias"]),
            vec![vec![Value::from("E1")], vec![Value::from("E2")]],
        ));
        batch.insert(DataTable::with_rows(
            "asv",
            cols(&["asv_id_alias", "DNA_sequence"]),
            vec![
                vec![Value::from("A1"), Value::from("ACGT")],
                vec![Value::from("A2"), Value::from("GGCC")],
                vec![Value::from("A3"), Value::from("ACGT")],
            ],
        ));
        batch.insert(DataTable::with_rows(
            "occurrence",
            cols(&["event_id_alias", "asv_id_alias", "organism_quantity"]),
            vec![
                vec![Value::from("E1"), Value::from("A1"), Value::Integer(3)],
                vec![Value::from("E2"), Value::from("A3"), Value::Integer(1)],
            ],
        ));
        batch
    }

    fn insert_all(engine: &InsertionEngine, store: &mut MemoryStore, batch: &mut ImportBatch) {
        for alias in ["dataset", "event", "asv", "occurrence"] {
            engine.resolve_references(batch, alias).unwrap();
            engine.insert_table(store, batch, alias, 0).unwrap();
        }
    }

    #[test]
    fn test_returned_ids_flow_into_children() {
        let mapping = load_mapping_str(MAPPING).unwrap();
        let engine = InsertionEngine::new(&mapping, 100);
        let mut store = MemoryStore::default();
        let mut batch = batch();

        insert_all(&engine, &mut store, &mut batch);

        let event = batch.get("event").unwrap();
        assert_eq!(event.value(0, "dataset_pid"), Some(&Value::Integer(1)));
        assert_eq!(event.value(1, "dataset_pid"), Some(&Value::Integer(1)));
        assert_eq!(event.value(1, "pid"), Some(&Value::Integer(2)));

        let occurrences = store.rows_of("occurrence");
        assert_eq!(occurrences.len(), 2);
        assert_eq!(occurrences[0], &vec![Value::Integer(1), Value::Integer(1), Value::Integer(3)]);
        assert_eq!(occurrences[1], &vec![Value::Integer(2), Value::Integer(1), Value::Integer(1)]);
    }

    #[test]
    fn test_content_addressed_rows_are_deduplicated() {
        let mapping = load_mapping_str(MAPPING).unwrap();
        let engine = InsertionEngine::new(&mapping, 100);
        let mut store = MemoryStore::default();
        let mut batch = batch();

        let outcome = engine.insert_table(&mut store, &mut batch, "asv", 0).unwrap();

        assert_eq!(outcome.summary.rows, 3);
        assert_eq!(outcome.summary.inserted, 2);
        assert_eq!((outcome.created, outcome.reused), (2, 0));
        let asv = batch.get("asv").unwrap();
        assert_eq!(asv.value(0, "pid"), asv.value(2, "pid"));
        assert_ne!(asv.value(0, "pid"), asv.value(1, "pid"));
    }

    #[test]
    fn test_content_key_is_stored_trimmed() {
        let mapping = load_mapping_str(MAPPING).unwrap();
        let engine = InsertionEngine::new(&mapping, 100);
        let mut store = MemoryStore::default();
        let mut batch = ImportBatch::new();
        batch.insert(DataTable::with_rows(
            "asv",
            cols(&["asv_id_alias", "DNA_sequence"]),
            vec![
                vec![Value::from("A1"), Value::from("ACGT")],
                vec![Value::from("A2"), Value::from(" ACGT ")],
            ],
        ));

        let outcome = engine.insert_table(&mut store, &mut batch, "asv", 0).unwrap();

        assert_eq!(outcome.summary.inserted, 1);
        assert_eq!(store.rows_of("asv"), vec![&vec![Value::from("ACGT")]]);
        let asv = batch.get("asv").unwrap();
        assert_eq!(asv.value(0, "pid"), Some(&Value::Integer(1)));
        assert_eq!(asv.value(1, "pid"), asv.value(0, "pid"));
    }

    #[test]
    fn test_second_upsert_reuses_existing_ids() {
        let mapping = load_mapping_str(MAPPING).unwrap();
        let engine = InsertionEngine::new(&mapping, 100);
        let mut store = MemoryStore::default();

        let mut first = batch();
        engine.insert_table(&mut store, &mut first, "asv", 0).unwrap();
        let before = store.max_id("asv", "pid").unwrap();

        let mut second = batch();
        let outcome = engine
            .insert_table(&mut store, &mut second, "asv", before)
            .unwrap();

        assert_eq!((outcome.created, outcome.reused), (0, 2));
        assert_eq!(store.rows_of("asv").len(), 2);
        assert_eq!(
            first.get("asv").unwrap().value(1, "pid"),
            second.get("asv").unwrap().value(1, "pid")
        );
    }

    #[test]
    fn test_chunks_respect_batch_size() {
        let mapping = load_mapping_str(MAPPING).unwrap();
        let engine = InsertionEngine::new(&mapping, 1);
        let mut store = MemoryStore::default();
        let mut batch = batch();

        let outcome = engine.insert_table(&mut store, &mut batch, "event", 0).unwrap();

        assert_eq!(outcome.summary.statements, 2);
        assert_eq!(store.statements, 2);
    }

    #[test]
    fn test_unmatched_join_key_is_unresolved() {
        let mapping = load_mapping_str(MAPPING).unwrap();
        let engine = InsertionEngine::new(&mapping, 100);
        let mut store = MemoryStore::default();
        let mut batch = batch();
        for alias in ["dataset", "event", "asv"] {
            engine.resolve_references(&mut batch, alias).unwrap();
            engine.insert_table(&mut store, &mut batch, alias, 0).unwrap();
        }
        batch.get_mut("occurrence").unwrap().push_row(vec![
            Value::from("E9"),
            Value::from("A1"),
            Value::Integer(1),
        ]);

        let err = engine.resolve_references(&mut batch, "occurrence").unwrap_err();

        assert!(matches!(err, ImportError::UnresolvedReference { ref field, .. } if field == "event_pid"));
        assert!(err.to_string().contains("E9"));
    }

    #[test]
    fn test_reference_before_parent_insert_is_unresolved() {
        let mapping = load_mapping_str(MAPPING).unwrap();
        let engine = InsertionEngine::new(&mapping, 100);
        let mut batch = batch();

        let err = engine.resolve_references(&mut batch, "event").unwrap_err();
        assert!(matches!(err, ImportError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_store_error_carries_statement_context() {
        let mapping = load_mapping_str(MAPPING).unwrap();
        let engine = InsertionEngine::new(&mapping, 100);
        let mut store = MemoryStore {
            fail_on: Some("dataset".into()),
            ..Default::default()
        };
        let mut batch = batch();

        let err = engine.insert_table(&mut store, &mut batch, "dataset", 0).unwrap_err();

        match err {
            ImportError::Store { context, source } => {
                assert!(context.contains("'ds-1'"));
                assert!(matches!(source, RepositoryError::UniqueConstraintViolation(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
