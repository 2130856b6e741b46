// ==========================================
// Molecular data portal - domain layer
// ==========================================
// Plain data shared by every stage: mapping descriptors, in-memory tables,
// annotation facts, reports
// ==========================================

pub mod annotation;
pub mod mapping;
pub mod report;
pub mod table;

// Re-exports
pub use annotation::{
    AnnotationConflict, AnnotationFacts, AnnotationStatus, ConflictSource, ReconcileOutcome,
    StoredAnnotation,
};
pub use mapping::{
    CoverageRule, DataMapping, Derivation, DistinctSpec, FieldDescriptor, FieldType,
    ReconcileSpec, ReferenceDescriptor, TableDescriptor, UnpivotSpec,
};
pub use report::{ImportReport, TableSummary, ValidationReport, Violation, ViolationKind};
pub use table::{DataTable, ImportBatch, Value};
