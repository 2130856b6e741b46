// ==========================================
// Molecular data portal - import layer
// ==========================================
// Role: turn an input bundle into rows in the portal store
// Inputs: tar archive of per-table CSV/TSV files, or a workbook
// Stages: read → unpivot → validate → derive → insert → reconcile
// ==========================================

pub mod conflict_handler;
pub mod data_cleaner;
pub mod dependency_resolver;
pub mod derivation;
pub mod dq_validator;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod import_orchestrator;
pub mod insertion_engine;

pub use conflict_handler::{AnnotationReconciler, ReconcilePlan};
pub use data_cleaner::DataCleaner;
pub use dependency_resolver::order_tables;
pub use derivation::DerivationService;
pub use dq_validator::Validator;
pub use error::{ErrorKind, ImportError, ImportResult};
pub use field_mapper::SchemaMapper;
pub use file_parser::{ArchiveParser, CsvParser, ExcelParser, InputReader, SheetSource};
pub use import_orchestrator::{ImportOptions, ImportOrchestrator};
pub use insertion_engine::{InsertionEngine, TableOutcome};
