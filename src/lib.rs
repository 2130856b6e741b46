// ==========================================
// Molecular data portal - import library
// ==========================================
// Schema-driven import of tabular biodiversity data
// Stack: Rust + SQLite
// ==========================================

// Plain data: mapping descriptors, tables, annotations, reports
pub mod domain;

// Data mapping document and store-held settings
pub mod config;

// Import pipeline
pub mod importer;

// Store access
pub mod repository;

// Connection setup (uniform PRAGMAs)
pub mod db;

// Logging
pub mod logging;

// ==========================================
// Re-exports
// ==========================================

pub use config::{load_mapping, ConfigManager, ImportConfigReader, ImportSettings};
pub use domain::{DataMapping, DataTable, ImportBatch, ImportReport, ValidationReport, Value};
pub use importer::{ErrorKind, ImportError, ImportOptions, ImportOrchestrator, ImportResult};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
