// ==========================================
// Molecular data portal - import orchestrator
// ==========================================
// Pipeline:
//   0. insertion order from the mapping (before any I/O)
//   1. read input → 2. unpivot → 3. validate → 4. defaults → 5. derive
//   6. per table in order: resolve references, [reconcile], insert
//   7. commit, or roll back on dry run / any error
// The only component that talks to transaction control.
// ==========================================

use crate::config::config_manager::DEFAULT_BATCH_SIZE;
use crate::domain::mapping::DataMapping;
use crate::domain::report::{ImportReport, ValidationReport};
use crate::domain::table::ImportBatch;
use crate::importer::conflict_handler::AnnotationReconciler;
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::dependency_resolver::order_tables;
use crate::importer::derivation::DerivationService;
use crate::importer::dq_validator::Validator;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::InputReader;
use crate::importer::insertion_engine::InsertionEngine;
use crate::repository::import_store::{ImportSession, ImportStore};
use crate::repository::import_store_impl::SqliteImportStore;
use rusqlite::Connection;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error, info, info_span};
use uuid::Uuid;

// ==========================================
// ImportOptions
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Rows per insert statement (upper bound)
    pub batch_size: usize,
    /// Perform every write, then roll back
    pub dry_run: bool,
    /// Run regex and uniqueness checks
    pub validate: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
            validate: true,
        }
    }
}

// ==========================================
// ImportOrchestrator
// ==========================================
pub struct ImportOrchestrator {
    mapping: DataMapping,
    options: ImportOptions,
    /// Sheet aliases in insertion order
    order: Vec<String>,
}

impl ImportOrchestrator {
    /// # Errors
    /// - `CyclicReference`: the mapping's reference graph has a cycle
    pub fn new(mapping: DataMapping, options: ImportOptions) -> ImportResult<Self> {
        let tables = mapping.target_tables();
        let edges = mapping.reference_edges();
        let order = order_tables(&tables, &edges)?
            .into_iter()
            .filter_map(|table| mapping.alias_for_table(&table).map(str::to_string))
            .collect::<Vec<_>>();
        debug!(order = ?order, "insertion order resolved");

        Ok(Self {
            mapping,
            options,
            order,
        })
    }

    pub fn mapping(&self) -> &DataMapping {
        &self.mapping
    }

    pub fn options(&self) -> ImportOptions {
        self.options
    }

    pub fn insertion_order(&self) -> &[String] {
        &self.order
    }

    /// Opens an IMMEDIATE transaction on `conn` and runs the import in it.
    pub fn run_with_connection(
        &self,
        conn: &mut Connection,
        input: Vec<u8>,
    ) -> ImportResult<ImportReport> {
        let session = SqliteImportStore::begin(conn)
            .map_err(|e| ImportError::store("BEGIN IMMEDIATE", e))?;
        self.run(session, input)
    }

    /// Runs the whole pipeline inside `session`.
    ///
    /// Ends with exactly one of commit (success), rollback (dry run) or
    /// rollback (any error). There is no partial outcome.
    pub fn run<S: ImportSession>(&self, mut session: S, input: Vec<u8>) -> ImportResult<ImportReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("import", run_id = %run_id, dry_run = self.options.dry_run);
        let _guard = span.enter();
        let started = Instant::now();
        info!(batch_size = self.options.batch_size, "import started");

        let mut report = match self.execute(&mut session, input) {
            Ok(report) => report,
            Err(err) => {
                error!(error = %err, kind = ?err.kind(), "import failed, rolling back");
                if let Err(rollback) = session.rollback() {
                    error!(error = %rollback, "rollback failed");
                }
                return Err(err);
            }
        };

        if self.options.dry_run {
            session
                .rollback()
                .map_err(|e| ImportError::store("ROLLBACK", e))?;
            info!("dry run, transaction rolled back");
        } else {
            session
                .commit()
                .map_err(|e| ImportError::store("COMMIT", e))?;
            report.committed = true;
        }

        report.run_id = run_id;
        report.dry_run = self.options.dry_run;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            committed = report.committed,
            tables = report.tables.len(),
            entities_created = report.entities_created,
            entities_reused = report.entities_reused,
            annotations_inserted = report.annotations_inserted,
            annotations_superseded = report.annotations_superseded,
            elapsed_ms = report.elapsed_ms,
            "import finished"
        );
        Ok(report)
    }

    fn execute<S: ImportStore>(&self, store: &mut S, input: Vec<u8>) -> ImportResult<ImportReport> {
        let mut batch = self.prepare(input)?;
        self.write(store, &mut batch)
    }

    // ==========================================
    // Preparation (no store access)
    // ==========================================

    /// Reads, validates and derives the batch.
    ///
    /// # Errors
    /// - input shape errors from the reader
    /// - `Validation`: every violation of the whole input
    pub fn prepare(&self, input: Vec<u8>) -> ImportResult<ImportBatch> {
        let mut batch = InputReader::read(input, &self.mapping)?;

        let mut report = ValidationReport::new();
        report.extend(DerivationService::unpivot_all(&mut batch, &self.mapping));

        let validator = if self.options.validate {
            Validator::new(&self.mapping)
        } else {
            Validator::new(&self.mapping).skip_patterns()
        };
        report.extend(validator.validate(&mut batch).violations);
        if !report.is_valid() {
            error!(violations = report.len(), "validation failed");
            return Err(ImportError::Validation(report));
        }

        for descriptor in self.mapping.tables() {
            if let Some(table) = batch.get_mut(&descriptor.alias) {
                DataCleaner::apply_defaults(table, descriptor);
            }
        }
        DerivationService::derive_all(&mut batch, &self.mapping);
        Ok(batch)
    }

    // ==========================================
    // Writes (inside the caller's transaction)
    // ==========================================

    fn write<S: ImportStore>(&self, store: &mut S, batch: &mut ImportBatch) -> ImportResult<ImportReport> {
        let engine = InsertionEngine::new(&self.mapping, self.options.batch_size);
        let existing = self.existing_maxima(store)?;
        let mut report = ImportReport::default();

        for alias in &self.order {
            if !batch.contains(alias) {
                debug!(sheet = %alias, "sheet absent, not inserted");
                continue;
            }
            let Some(descriptor) = self.mapping.get(alias) else {
                continue;
            };
            engine.resolve_references(batch, alias)?;

            if let Some(reconciler) = AnnotationReconciler::for_table(descriptor) {
                let entity_max = self
                    .entity_table(alias)
                    .and_then(|t| existing.get(&t).copied())
                    .unwrap_or(0);
                let plan = match batch.get(alias) {
                    Some(table) => reconciler.plan(store, table, entity_max)?,
                    None => continue,
                };
                if let Some(table) = batch.get_mut(alias) {
                    report.annotations_superseded += reconciler.apply(store, table, &plan)?;
                }
                report.annotations_unchanged += plan.unchanged();
                let outcome = engine.insert_table(store, batch, alias, 0)?;
                report.annotations_inserted += outcome.summary.inserted;
                report.tables.push(outcome.summary);
                continue;
            }

            let table_max = descriptor
                .target_table
                .as_ref()
                .and_then(|t| existing.get(t).copied())
                .unwrap_or(0);
            let outcome = engine.insert_table(store, batch, alias, table_max)?;
            report.entities_created += outcome.created;
            report.entities_reused += outcome.reused;
            report.tables.push(outcome.summary);
        }
        Ok(report)
    }

    /// Target table of the entity a reconciled sheet annotates.
    fn entity_table(&self, alias: &str) -> Option<String> {
        let descriptor = self.mapping.get(alias)?;
        let spec = descriptor.reconcile.as_ref()?;
        descriptor
            .field_by_target(&spec.entity_field)?
            .references
            .as_ref()
            .map(|r| r.table.clone())
    }

    /// Largest id of every table whose pre-import state matters: upsert
    /// tables and tables whose entities are reconciled. Taken before the
    /// first write.
    fn existing_maxima<S: ImportStore>(&self, store: &mut S) -> ImportResult<HashMap<String, i64>> {
        let mut tables: Vec<String> = self
            .mapping
            .tables()
            .iter()
            .filter(|d| d.upsert_key.is_some())
            .filter_map(|d| d.target_table.clone())
            .collect();
        tables.extend(self.order.iter().filter_map(|alias| self.entity_table(alias)));

        let mut maxima = HashMap::new();
        for table in tables {
            if maxima.contains_key(&table) {
                continue;
            }
            let Some(column) = self
                .mapping
                .by_target_table(&table)
                .and_then(|d| d.returning.clone())
            else {
                continue;
            };
            let max = store
                .max_id(&table, &column)
                .map_err(|e| ImportError::store(format!("SELECT MAX({}) FROM {}", column, table), e))?;
            debug!(table = %table, max, "pre-import id marker");
            maxima.insert(table, max);
        }
        Ok(maxima)
    }
}
