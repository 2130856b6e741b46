// ==========================================
// Molecular data portal - import error types
// ==========================================
// Taxonomy: configuration / input shape / validation / reconciliation / store
// Tooling: thiserror derive
// ==========================================

use crate::domain::annotation::AnnotationConflict;
use crate::domain::report::ValidationReport;
use crate::repository::error::RepositoryError;
use serde::Serialize;
use thiserror::Error;

/// Import pipeline error
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== Configuration =====
    #[error("cannot read mapping file {path}: {message}")]
    MappingFile { path: String, message: String },

    #[error("mapping file is not valid JSON: {0}")]
    MappingSyntax(String),

    #[error("invalid mapping at {path}: {message}")]
    MappingInvalid { path: String, message: String },

    #[error("cyclic table references among: {}", remaining.join(", "))]
    CyclicReference { remaining: Vec<String> },

    #[error("invalid setting (key: {key}, value: {value}): {message}")]
    ConfigValue {
        key: String,
        value: String,
        message: String,
    },

    // ===== Input shape =====
    #[error("input neither recognized as tar archive nor as workbook: {0}")]
    UnrecognizedInput(String),

    #[error("input sheet '{0}' not found")]
    MissingSheet(String),

    #[error("input sheet '{0}' has no data rows")]
    EmptySheet(String),

    #[error("CSV parse failed ({sheet}): {message}")]
    CsvParse { sheet: String, message: String },

    #[error("workbook parse failed: {0}")]
    ExcelParse(String),

    #[error("archive read failed: {0}")]
    ArchiveRead(String),

    #[error("file read failed: {0}")]
    FileRead(String),

    // ===== Validation =====
    #[error("validation failed: {0}")]
    Validation(ValidationReport),

    // ===== Reconciliation =====
    #[error("{} annotation conflict(s) require curator review", .0.len())]
    Reconciliation(Vec<AnnotationConflict>),

    // ===== Store =====
    #[error("store error ({context}): {source}")]
    Store {
        context: String,
        #[source]
        source: RepositoryError,
    },

    #[error("unresolved reference {sheet}.{field}: {message}")]
    UnresolvedReference {
        sheet: String,
        field: String,
        message: String,
    },
}

/// Coarse error class for programmatic callers and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    InputShape,
    Validation,
    Reconciliation,
    Store,
}

impl ErrorKind {
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorKind::Configuration => 2,
            ErrorKind::InputShape => 3,
            ErrorKind::Validation => 4,
            ErrorKind::Reconciliation => 5,
            ErrorKind::Store => 6,
        }
    }
}

impl ImportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::MappingFile { .. }
            | ImportError::MappingSyntax(_)
            | ImportError::MappingInvalid { .. }
            | ImportError::CyclicReference { .. }
            | ImportError::ConfigValue { .. } => ErrorKind::Configuration,
            ImportError::UnrecognizedInput(_)
            | ImportError::MissingSheet(_)
            | ImportError::EmptySheet(_)
            | ImportError::CsvParse { .. }
            | ImportError::ExcelParse(_)
            | ImportError::ArchiveRead(_)
            | ImportError::FileRead(_) => ErrorKind::InputShape,
            ImportError::Validation(_) => ErrorKind::Validation,
            ImportError::Reconciliation(_) => ErrorKind::Reconciliation,
            ImportError::Store { .. } | ImportError::UnresolvedReference { .. } => ErrorKind::Store,
        }
    }

    pub fn store(context: impl Into<String>, source: impl Into<RepositoryError>) -> Self {
        ImportError::Store {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn invalid_mapping(path: impl Into<String>, message: impl Into<String>) -> Self {
        ImportError::MappingInvalid {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileRead(err.to_string())
    }
}

impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParse(err.to_string())
    }
}

/// Result alias
pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_map_to_distinct_exit_codes() {
        let errors = vec![
            ImportError::MappingSyntax("x".into()),
            ImportError::MissingSheet("event".into()),
            ImportError::Validation(ValidationReport::new()),
            ImportError::Reconciliation(Vec::new()),
            ImportError::store("insert", RepositoryError::DatabaseQueryError("x".into())),
        ];

        let mut codes: Vec<u8> = errors.iter().map(|e| e.kind().exit_code()).collect();
        codes.dedup();
        assert_eq!(codes, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_missing_sheet_and_unrecognized_input_are_distinct() {
        let missing = ImportError::MissingSheet("event".into());
        let unknown = ImportError::UnrecognizedInput("bad magic".into());

        assert_eq!(missing.kind(), ErrorKind::InputShape);
        assert!(missing.to_string().contains("'event' not found"));
        assert!(unknown.to_string().contains("neither recognized"));
    }

    #[test]
    fn test_cyclic_reference_lists_tables() {
        let err = ImportError::CyclicReference {
            remaining: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "cyclic table references among: a, b");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
