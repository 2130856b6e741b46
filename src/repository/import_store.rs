// ==========================================
// Molecular data portal - import store interface
// ==========================================
// Role: the only persistence surface the import pipeline sees
// ImportStore: data operations (insertion engine, reconciler)
// ImportSession: adds transaction control (orchestrator only)
// ==========================================

use crate::domain::annotation::StoredAnnotation;
use crate::domain::mapping::{ReconcileSpec, TableDescriptor};
use crate::domain::table::Value;
use crate::importer::field_mapper::InsertStatement;
use crate::repository::error::RepositoryResult;

// ==========================================
// AnnotationQuery - columns of a reconciled table
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationQuery {
    pub table: String,
    pub id_column: String,
    pub entity_column: String,
    pub target_column: String,
    pub prediction_column: String,
    pub status_column: String,
    /// Additional columns compared for full-record equality
    pub record_columns: Vec<String>,
}

impl AnnotationQuery {
    /// Builds the query from a reconciled table descriptor, or `None` when
    /// the descriptor lacks a target table or returning column.
    pub fn from_descriptor(descriptor: &TableDescriptor, spec: &ReconcileSpec) -> Option<Self> {
        let table = descriptor.target_table.clone()?;
        let id_column = descriptor.returning.clone()?;
        let fixed = [
            &spec.entity_field,
            &spec.target_field,
            &spec.prediction_field,
            &spec.status_field,
        ];
        let record_columns = descriptor
            .insert_fields()
            .map(|f| f.target.clone())
            .filter(|c| !fixed.contains(&c))
            .collect();

        Some(Self {
            table,
            id_column,
            entity_column: spec.entity_field.clone(),
            target_column: spec.target_field.clone(),
            prediction_column: spec.prediction_field.clone(),
            status_column: spec.status_field.clone(),
            record_columns,
        })
    }
}

// ==========================================
// ImportStore Trait
// ==========================================
// Implementers: SqliteImportStore, in-memory fakes in tests
pub trait ImportStore {
    /// Executes one multi-row insert.
    ///
    /// # Returns
    /// - one `Vec<Value>` per returned row, in `statement.returning` order;
    ///   empty when the statement has no RETURNING clause
    fn insert_rows(
        &mut self,
        statement: &InsertStatement,
        rows: &[Vec<Value>],
    ) -> RepositoryResult<Vec<Vec<Value>>>;

    /// Largest value of `column` in `table`, 0 when the table is empty.
    fn max_id(&mut self, table: &str, column: &str) -> RepositoryResult<i64>;

    /// Valid annotations of the given entities.
    fn valid_annotations(
        &mut self,
        query: &AnnotationQuery,
        entity_ids: &[i64],
    ) -> RepositoryResult<Vec<StoredAnnotation>>;

    /// Moves the given valid annotations to `superseded`.
    ///
    /// # Returns
    /// - number of rows changed
    fn supersede_annotations(
        &mut self,
        query: &AnnotationQuery,
        ids: &[i64],
    ) -> RepositoryResult<usize>;
}

// ==========================================
// ImportSession Trait
// ==========================================
pub trait ImportSession: ImportStore + Sized {
    fn commit(self) -> RepositoryResult<()>;
    fn rollback(self) -> RepositoryResult<()>;
}

impl<T: ImportStore + ?Sized> ImportStore for &mut T {
    fn insert_rows(
        &mut self,
        statement: &InsertStatement,
        rows: &[Vec<Value>],
    ) -> RepositoryResult<Vec<Vec<Value>>> {
        (**self).insert_rows(statement, rows)
    }

    fn max_id(&mut self, table: &str, column: &str) -> RepositoryResult<i64> {
        (**self).max_id(table, column)
    }

    fn valid_annotations(
        &mut self,
        query: &AnnotationQuery,
        entity_ids: &[i64],
    ) -> RepositoryResult<Vec<StoredAnnotation>> {
        (**self).valid_annotations(query, entity_ids)
    }

    fn supersede_annotations(
        &mut self,
        query: &AnnotationQuery,
        ids: &[i64],
    ) -> RepositoryResult<usize> {
        (**self).supersede_annotations(query, ids)
    }
}

// ==========================================
// MemoryStore - in-memory fake for unit tests
// ==========================================
#[cfg(test)]
pub mod memory {
    use super::*;
    use crate::repository::error::RepositoryError;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    pub struct MemoryStore {
        /// (table, statement columns, row) in insertion order
        pub rows: Vec<(String, Vec<String>, Vec<Value>)>,
        pub last_id: HashMap<String, i64>,
        pub content_keys: HashMap<(String, String), i64>,
        pub annotations: Vec<StoredAnnotation>,
        pub superseded: Vec<i64>,
        pub statements: usize,
        /// Table whose inserts fail with a unique violation
        pub fail_on: Option<String>,
        pub committed: bool,
        pub rolled_back: bool,
    }

    impl MemoryStore {
        pub fn rows_of(&self, table: &str) -> Vec<&Vec<Value>> {
            self.rows
                .iter()
                .filter(|(t, _, _)| t == table)
                .map(|(_, _, row)| row)
                .collect()
        }

        pub fn seed_annotation(&mut self, annotation: StoredAnnotation) {
            self.annotations.push(annotation);
        }
    }

    impl ImportStore for MemoryStore {
        fn insert_rows(
            &mut self,
            statement: &InsertStatement,
            rows: &[Vec<Value>],
        ) -> RepositoryResult<Vec<Vec<Value>>> {
            if self.fail_on.as_deref() == Some(statement.table.as_str()) {
                return Err(RepositoryError::UniqueConstraintViolation(format!(
                    "UNIQUE constraint failed: {}",
                    statement.table
                )));
            }
            self.statements += 1;

            let key_pos = statement
                .conflict_key
                .as_ref()
                .and_then(|k| statement.columns.iter().position(|c| c == k));
            let mut returned = Vec::new();

            for row in rows {
                let existing = key_pos
                    .and_then(|p| row[p].as_key())
                    .and_then(|k| self.content_keys.get(&(statement.table.clone(), k)).copied());
                let id = match existing {
                    Some(id) => id,
                    None => {
                        let next = self.last_id.entry(statement.table.clone()).or_insert(0);
                        *next += 1;
                        let id = *next;
                        if let Some(key) = key_pos.and_then(|p| row[p].as_key()) {
                            self.content_keys.insert((statement.table.clone(), key), id);
                        }
                        self.rows
                            .push((statement.table.clone(), statement.columns.clone(), row.clone()));
                        id
                    }
                };

                if !statement.returning.is_empty() {
                    returned.push(
                        statement
                            .returning
                            .iter()
                            .map(|c| match statement.columns.iter().position(|s| s == c) {
                                Some(p) => row[p].clone(),
                                None => Value::Integer(id),
                            })
                            .collect(),
                    );
                }
            }
            Ok(returned)
        }

        fn max_id(&mut self, table: &str, _column: &str) -> RepositoryResult<i64> {
            Ok(self.last_id.get(table).copied().unwrap_or(0))
        }

        fn valid_annotations(
            &mut self,
            _query: &AnnotationQuery,
            entity_ids: &[i64],
        ) -> RepositoryResult<Vec<StoredAnnotation>> {
            Ok(self
                .annotations
                .iter()
                .filter(|a| entity_ids.contains(&a.entity_id) && !self.superseded.contains(&a.id))
                .cloned()
                .collect())
        }

        fn supersede_annotations(
            &mut self,
            _query: &AnnotationQuery,
            ids: &[i64],
        ) -> RepositoryResult<usize> {
            let mut changed = 0;
            for id in ids {
                if !self.superseded.contains(id) {
                    self.superseded.push(*id);
                    changed += 1;
                }
            }
            Ok(changed)
        }
    }

    impl ImportSession for &mut MemoryStore {
        fn commit(self) -> RepositoryResult<()> {
            self.committed = true;
            Ok(())
        }

        fn rollback(self) -> RepositoryResult<()> {
            self.rolled_back = true;
            Ok(())
        }
    }
}
