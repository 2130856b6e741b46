// ==========================================
// Molecular data portal - repository layer
// ==========================================
// Role: the only code that speaks SQL
// Constraint: every value is a bound parameter
// ==========================================

pub mod error;
pub mod import_store;
pub mod import_store_impl;

pub use error::{RepositoryError, RepositoryResult};
pub use import_store::{AnnotationQuery, ImportSession, ImportStore};
pub use import_store_impl::SqliteImportStore;
