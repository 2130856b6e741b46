// ==========================================
// Molecular data portal - annotation reconciler
// ==========================================
// Per submitted annotation of an entity that existed before this import:
//   no valid annotation      → insert
//   consistent               → skip (idempotent re-import)
//   prediction/target conflict → abort the whole import, every conflict listed
//   target upgrade           → supersede old, insert new as valid
// Same-import duplicates of one entity must agree; agreeing ones insert once.
// Every conflict is found before the first write.
// ==========================================

use crate::domain::annotation::{
    AnnotationConflict, AnnotationFacts, AnnotationStatus, ConflictSource, ReconcileOutcome,
    StoredAnnotation,
};
use crate::domain::mapping::TableDescriptor;
use crate::domain::table::{DataTable, Value};
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::import_store::{AnnotationQuery, ImportStore};
use std::collections::HashMap;
use tracing::{info, warn};

/// Decisions for one annotation sheet, computed before any write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Per sheet row: insert it or not
    pub keep: Vec<bool>,
    /// Stored annotation ids to move to `superseded`
    pub supersede: Vec<i64>,
    /// Entities per non-conflicting outcome
    pub outcomes: HashMap<ReconcileOutcome, usize>,
    pub duplicates: usize,
}

impl ReconcilePlan {
    pub fn inserted(&self) -> usize {
        self.keep.iter().filter(|k| **k).count()
    }

    pub fn count(&self, outcome: ReconcileOutcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    /// Consistent re-imports, skipped without a write.
    pub fn unchanged(&self) -> usize {
        self.count(ReconcileOutcome::Consistent)
    }

    fn record_outcome(&mut self, outcome: ReconcileOutcome) {
        *self.outcomes.entry(outcome).or_insert(0) += 1;
    }
}

pub struct AnnotationReconciler {
    query: AnnotationQuery,
    entity_column: String,
    target_column: String,
    prediction_column: String,
    status_column: String,
    /// Natural key of the entity, for conflict reports
    entity_key_column: Option<String>,
    /// (destination column, sheet column) compared for full-record equality
    record_columns: Vec<(String, String)>,
}

impl AnnotationReconciler {
    /// `None` when the sheet declares no reconciliation.
    pub fn for_table(descriptor: &TableDescriptor) -> Option<Self> {
        let spec = descriptor.reconcile.as_ref()?;
        let query = AnnotationQuery::from_descriptor(descriptor, spec)?;
        let column = |target: &str| -> String {
            descriptor
                .field_by_target(target)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| target.to_string())
        };
        let entity_key_column = descriptor
            .field_by_target(&spec.entity_field)
            .and_then(|f| f.references.as_ref())
            .and_then(|r| r.join_on.clone());
        let record_columns = query
            .record_columns
            .iter()
            .map(|c| (c.clone(), column(c)))
            .collect();

        Some(Self {
            entity_column: column(&spec.entity_field),
            target_column: column(&spec.target_field),
            prediction_column: column(&spec.prediction_field),
            status_column: column(&spec.status_field),
            entity_key_column,
            record_columns,
            query,
        })
    }

    fn entity_id(&self, table: &DataTable, row: usize) -> ImportResult<i64> {
        table
            .value(row, &self.entity_column)
            .and_then(Value::as_i64)
            .ok_or_else(|| ImportError::UnresolvedReference {
                sheet: table.name().to_string(),
                field: self.entity_column.clone(),
                message: format!("row {}: entity id is not resolved", row + 2),
            })
    }

    fn entity_key(&self, table: &DataTable, row: usize, entity_id: i64) -> String {
        self.entity_key_column
            .as_ref()
            .and_then(|c| table.value(row, c))
            .and_then(Value::as_key)
            .unwrap_or_else(|| entity_id.to_string())
    }

    /// A missing prediction counts as negative.
    fn facts(&self, table: &DataTable, row: usize) -> AnnotationFacts {
        AnnotationFacts {
            target: table
                .value(row, &self.target_column)
                .and_then(Value::as_key)
                .unwrap_or_default(),
            prediction: table
                .value(row, &self.prediction_column)
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    fn record(&self, table: &DataTable, row: usize) -> Vec<(String, Option<String>)> {
        self.record_columns
            .iter()
            .map(|(target, column)| (target.clone(), table.value(row, column).and_then(canonical)))
            .collect()
    }

    fn stored_record(stored: &StoredAnnotation) -> Vec<(String, Option<String>)> {
        stored
            .record
            .iter()
            .map(|(c, v)| {
                let v = v.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
                (c.clone(), v)
            })
            .collect()
    }

    // ==========================================
    // Planning (read-only)
    // ==========================================

    /// Classifies every submitted row against the store.
    ///
    /// # Arguments
    /// - `existing_max`: largest entity id before this import; entities above
    ///   it were created by this import and cannot hold annotations yet
    ///
    /// # Errors
    /// - `Reconciliation`: every conflicting entity, stored and same-import
    pub fn plan<S: ImportStore + ?Sized>(
        &self,
        store: &mut S,
        table: &DataTable,
        existing_max: i64,
    ) -> ImportResult<ReconcilePlan> {
        let mut plan = ReconcilePlan {
            keep: vec![false; table.len()],
            ..Default::default()
        };
        let mut conflicts = Vec::new();

        // one candidate row per entity
        let mut first_row: HashMap<i64, usize> = HashMap::new();
        let mut candidates = Vec::new();
        for row in 0..table.len() {
            let entity_id = self.entity_id(table, row)?;
            match first_row.get(&entity_id) {
                Some(&first) => {
                    let (old, new) = (self.facts(table, first), self.facts(table, row));
                    if old == new {
                        plan.duplicates += 1;
                    } else {
                        let outcome = if old.target == new.target {
                            ReconcileOutcome::PredictionConflict
                        } else {
                            ReconcileOutcome::TargetConflict
                        };
                        conflicts.push(AnnotationConflict {
                            entity_id,
                            entity_key: self.entity_key(table, row, entity_id),
                            outcome,
                            source: ConflictSource::SameImport,
                            records_equal: self.record(table, first) == self.record(table, row),
                            old,
                            new,
                        });
                    }
                }
                None => {
                    first_row.insert(entity_id, row);
                    candidates.push((row, entity_id));
                }
            }
        }

        let mut existing: Vec<i64> = candidates
            .iter()
            .map(|(_, id)| *id)
            .filter(|id| *id <= existing_max)
            .collect();
        existing.sort_unstable();
        let stored = if existing.is_empty() {
            Vec::new()
        } else {
            store
                .valid_annotations(&self.query, &existing)
                .map_err(|e| ImportError::store(format!("SELECT valid annotations FROM {}", self.query.table), e))?
        };
        let mut by_entity: HashMap<i64, Vec<StoredAnnotation>> = HashMap::new();
        for annotation in stored {
            by_entity.entry(annotation.entity_id).or_default().push(annotation);
        }

        for (row, entity_id) in candidates {
            let new = self.facts(table, row);
            let Some(olds) = by_entity.get(&entity_id).filter(|o| !o.is_empty()) else {
                plan.keep[row] = true;
                plan.record_outcome(ReconcileOutcome::NoExistingAnnotation);
                continue;
            };

            let record = self.record(table, row);
            let compared: Vec<&StoredAnnotation> =
                match olds.iter().find(|o| o.facts.target == new.target) {
                    Some(same) => vec![same],
                    None => olds.iter().collect(),
                };
            let outcomes: Vec<(ReconcileOutcome, &StoredAnnotation)> = compared
                .into_iter()
                .map(|old| {
                    let same_target = old.facts.target == new.target;
                    (
                        ReconcileOutcome::classify(same_target, old.facts.prediction, new.prediction),
                        old,
                    )
                })
                .collect();

            if outcomes.iter().any(|(o, _)| o.is_conflict()) {
                for (outcome, old) in outcomes.into_iter().filter(|(o, _)| o.is_conflict()) {
                    conflicts.push(AnnotationConflict {
                        entity_id,
                        entity_key: self.entity_key(table, row, entity_id),
                        outcome,
                        source: ConflictSource::Stored,
                        records_equal: Self::stored_record(old) == record,
                        old: old.facts.clone(),
                        new: new.clone(),
                    });
                }
            } else if outcomes.iter().all(|(o, _)| *o == ReconcileOutcome::Consistent) {
                plan.record_outcome(ReconcileOutcome::Consistent);
            } else {
                plan.supersede.extend(outcomes.iter().map(|(_, old)| old.id));
                plan.keep[row] = true;
                plan.record_outcome(ReconcileOutcome::TargetUpgrade);
            }
        }

        if !conflicts.is_empty() {
            for conflict in &conflicts {
                warn!(conflict = %conflict, "annotation conflict");
            }
            return Err(ImportError::Reconciliation(conflicts));
        }
        Ok(plan)
    }

    // ==========================================
    // Apply
    // ==========================================

    /// Supersedes the planned annotations and trims `table` to the rows that
    /// will be inserted, with their status forced to `valid`.
    ///
    /// # Returns
    /// - number of annotations superseded
    pub fn apply<S: ImportStore + ?Sized>(
        &self,
        store: &mut S,
        table: &mut DataTable,
        plan: &ReconcilePlan,
    ) -> ImportResult<usize> {
        let superseded = if plan.supersede.is_empty() {
            0
        } else {
            store
                .supersede_annotations(&self.query, &plan.supersede)
                .map_err(|e| ImportError::store(format!("UPDATE {} SET status", self.query.table), e))?
        };

        let mut row = 0;
        table.retain_rows(|_| {
            let keep = plan.keep.get(row).copied().unwrap_or(false);
            row += 1;
            keep
        });
        let status = table.ensure_column(&self.status_column);
        for row in 0..table.len() {
            table.set_value(row, status, Value::Text(AnnotationStatus::Valid.as_str().to_string()));
        }

        info!(
            sheet = table.name(),
            inserted = table.len(),
            superseded,
            unchanged = plan.unchanged(),
            duplicates = plan.duplicates,
            "annotations reconciled"
        );
        Ok(superseded)
    }
}

/// Store-comparable rendering: booleans as 0/1, dates as ISO text.
fn canonical(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        other => other.as_key(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::mapping_loader::load_mapping_str;
    use crate::domain::mapping::DataMapping;
    use crate::repository::import_store::memory::MemoryStore;

    fn mapping() -> DataMapping {
        load_mapping_str(
            r#"{
                "asv": {"targetTable": "asv", "returning": "pid", "DNA_sequence": {}},
                "annotation": {
                    "targetTable": "taxon_annotation", "returning": "pid",
                    "reconcile": {"entityField": "asv_pid", "targetField": "annotation_target",
                                  "predictionField": "target_prediction", "statusField": "status"},
                    "asv_pid": {"references": {"table": "asv", "column": "pid", "joinOn": "asv_id_alias"}},
                    "asv_id_alias": {"insert": false},
                    "status": {"default": "valid"},
                    "annotation_target": {},
                    "target_prediction": {"type": "boolean"},
                    "genus": {}
                }
            }"#,
        )
        .unwrap()
    }

    fn sheet(rows: &[(i64, &str, bool, &str)]) -> DataTable {
        DataTable::with_rows(
            "annotation",
            ["asv_pid", "asv_id_alias", "status", "annotation_target", "target_prediction", "genus"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows.iter()
                .map(|(entity, target, prediction, genus)| {
                    vec![
                        Value::Integer(*entity),
                        Value::from(format!("asv-{}", entity)),
                        Value::from("valid"),
                        Value::from(*target),
                        Value::Bool(*prediction),
                        Value::from(*genus),
                    ]
                })
                .collect(),
        )
    }

    fn stored(id: i64, entity: i64, target: &str, prediction: bool, genus: &str) -> StoredAnnotation {
        StoredAnnotation {
            id,
            entity_id: entity,
            facts: AnnotationFacts {
                target: target.to_string(),
                prediction,
            },
            record: vec![("genus".to_string(), Some(genus.to_string()))],
        }
    }

    #[test]
    fn test_new_entities_insert_without_lookup() {
        let mapping = mapping();
        let reconciler = AnnotationReconciler::for_table(mapping.get("annotation").unwrap()).unwrap();
        let mut store = MemoryStore::default();
        store.seed_annotation(stored(1, 12, "16S", false, "Nitrospira"));

        let plan = reconciler
            .plan(&mut store, &sheet(&[(12, "18S", false, "Nitrospira")]), 10)
            .unwrap();

        assert_eq!(plan.keep, vec![true]);
        assert!(plan.supersede.is_empty());
        assert_eq!(plan.count(ReconcileOutcome::NoExistingAnnotation), 1);
        assert_eq!(plan.unchanged(), 0);
    }

    #[test]
    fn test_consistent_reimport_is_skipped() {
        let mapping = mapping();
        let reconciler = AnnotationReconciler::for_table(mapping.get("annotation").unwrap()).unwrap();
        let mut store = MemoryStore::default();
        store.seed_annotation(stored(1, 7, "16S", true, "Nitrospira"));

        let plan = reconciler
            .plan(&mut store, &sheet(&[(7, "16S", true, "Nitrospira")]), 10)
            .unwrap();

        assert_eq!(plan.keep, vec![false]);
        assert_eq!(plan.unchanged(), 1);
        assert_eq!(plan.count(ReconcileOutcome::NoExistingAnnotation), 0);
    }

    #[test]
    fn test_upgrade_supersedes_and_forces_valid() {
        let mapping = mapping();
        let reconciler = AnnotationReconciler::for_table(mapping.get("annotation").unwrap()).unwrap();
        let mut store = MemoryStore::default();
        store.seed_annotation(stored(1, 7, "16S", false, "Nitrospira"));
        let mut table = sheet(&[(7, "18S", true, "Nitrospira"), (8, "16S", true, "Bacillus")]);
        table.set_value(0, 2, Value::from("superseded"));

        let plan = reconciler.plan(&mut store, &table, 10).unwrap();
        assert_eq!(plan.count(ReconcileOutcome::TargetUpgrade), 1);
        assert_eq!(plan.count(ReconcileOutcome::NoExistingAnnotation), 1);
        let superseded = reconciler.apply(&mut store, &mut table, &plan).unwrap();

        assert_eq!(superseded, 1);
        assert_eq!(store.superseded, vec![1]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.value(0, "status"), Some(&Value::from("valid")));
    }

    #[test]
    fn test_upgrade_requires_every_valid_annotation_to_upgrade() {
        let mapping = mapping();
        let reconciler = AnnotationReconciler::for_table(mapping.get("annotation").unwrap()).unwrap();
        let mut store = MemoryStore::default();
        store.seed_annotation(stored(1, 7, "16S", false, "Nitrospira"));
        store.seed_annotation(stored(2, 7, "ITS", true, "Nitrospira"));

        let err = reconciler
            .plan(&mut store, &sheet(&[(7, "18S", true, "Nitrospira")]), 10)
            .unwrap_err();

        let ImportError::Reconciliation(conflicts) = err else {
            panic!("expected reconciliation error");
        };
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].old.target, "ITS");
        assert_eq!(conflicts[0].outcome, ReconcileOutcome::TargetConflict);
        assert!(store.superseded.is_empty());
    }

    #[test]
    fn test_every_conflict_is_reported() {
        let mapping = mapping();
        let reconciler = AnnotationReconciler::for_table(mapping.get("annotation").unwrap()).unwrap();
        let mut store = MemoryStore::default();
        store.seed_annotation(stored(1, 7, "16S", true, "Nitrospira"));
        store.seed_annotation(stored(2, 8, "16S", true, "Bacillus"));

        let err = reconciler
            .plan(
                &mut store,
                &sheet(&[(7, "16S", false, "Nitrospira"), (8, "18S", true, "Bacillus")]),
                10,
            )
            .unwrap_err();

        let ImportError::Reconciliation(conflicts) = err else {
            panic!("expected reconciliation error");
        };
        let outcomes: Vec<_> = conflicts.iter().map(|c| (c.entity_key.as_str(), c.outcome)).collect();
        assert_eq!(
            outcomes,
            vec![
                ("asv-7", ReconcileOutcome::PredictionConflict),
                ("asv-8", ReconcileOutcome::TargetConflict)
            ]
        );
    }

    #[test]
    fn test_same_import_duplicates() {
        let mapping = mapping();
        let reconciler = AnnotationReconciler::for_table(mapping.get("annotation").unwrap()).unwrap();
        let mut store = MemoryStore::default();

        let plan = reconciler
            .plan(
                &mut store,
                &sheet(&[(20, "16S", true, "Nitrospira"), (20, "16S", true, "Nitrospira")]),
                10,
            )
            .unwrap();
        assert_eq!(plan.keep, vec![true, false]);
        assert_eq!(plan.duplicates, 1);

        let err = reconciler
            .plan(
                &mut store,
                &sheet(&[(20, "16S", true, "Nitrospira"), (20, "16S", false, "Nitrospira")]),
                10,
            )
            .unwrap_err();
        let ImportError::Reconciliation(conflicts) = err else {
            panic!("expected reconciliation error");
        };
        assert_eq!(conflicts[0].source, ConflictSource::SameImport);
        assert_eq!(conflicts[0].outcome, ReconcileOutcome::PredictionConflict);
    }

    #[test]
    fn test_outcome_depends_only_on_target_and_predictions() {
        let mapping = mapping();
        let reconciler = AnnotationReconciler::for_table(mapping.get("annotation").unwrap()).unwrap();

        for same_target in [true, false] {
            for old_prediction in [true, false] {
                for new_prediction in [true, false] {
                    for records_equal in [true, false] {
                        let mut store = MemoryStore::default();
                        store.seed_annotation(stored(1, 7, "16S", old_prediction, "Nitrospira"));
                        let target = if same_target { "16S" } else { "18S" };
                        let genus = if records_equal { "Nitrospira" } else { "Bacillus" };
                        let case = (same_target, old_prediction, new_prediction, records_equal);

                        let result =
                            reconciler.plan(&mut store, &sheet(&[(7, target, new_prediction, genus)]), 10);
                        let expected =
                            ReconcileOutcome::classify(same_target, old_prediction, new_prediction);

                        match expected {
                            ReconcileOutcome::Consistent => {
                                let plan = result.unwrap();
                                assert_eq!(plan.unchanged(), 1, "{:?}", case);
                                assert!(plan.supersede.is_empty(), "{:?}", case);
                            }
                            ReconcileOutcome::TargetUpgrade => {
                                let plan = result.unwrap();
                                assert_eq!(plan.supersede, vec![1], "{:?}", case);
                                assert_eq!(plan.keep, vec![true], "{:?}", case);
                            }
                            _ => {
                                let Err(ImportError::Reconciliation(conflicts)) = result else {
                                    panic!("expected conflict for {:?}", case);
                                };
                                assert_eq!(conflicts.len(), 1, "{:?}", case);
                                assert_eq!(conflicts[0].outcome, expected, "{:?}", case);
                                assert_eq!(conflicts[0].records_equal, records_equal, "{:?}", case);
                            }
                        }
                    }
                }
            }
        }
    }
}
