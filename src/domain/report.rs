// ==========================================
// Molecular data portal - validation and import reports
// ==========================================

use serde::Serialize;
use std::fmt;

// ==========================================
// Validation report
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingField,
    UnexpectedField,
    TypeMismatch,
    PatternMismatch,
    DuplicateValue,
    MissingKey,
    NonNumericCount,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::MissingField => "missing field",
            ViolationKind::UnexpectedField => "unexpected field",
            ViolationKind::TypeMismatch => "type mismatch",
            ViolationKind::PatternMismatch => "pattern mismatch",
            ViolationKind::DuplicateValue => "duplicate value",
            ViolationKind::MissingKey => "missing key",
            ViolationKind::NonNumericCount => "non-numeric count",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub sheet: String,
    pub field: String,
    /// Spreadsheet row number (header is row 1), when row-specific
    pub row: Option<usize>,
    pub kind: ViolationKind,
    pub value: Option<String>,
    pub message: String,
}

impl Violation {
    pub fn new(
        sheet: impl Into<String>,
        field: impl Into<String>,
        kind: ViolationKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            sheet: sheet.into(),
            field: field.into(),
            row: None,
            kind,
            value: None,
            message: message.into(),
        }
    }

    /// Converts a zero-based data row index into a spreadsheet row number.
    pub fn at_row(mut self, index: usize) -> Self {
        self.row = Some(index + 2);
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sheet, self.field)?;
        if let Some(row) = self.row {
            write!(f, " (row {})", row)?;
        }
        write!(f, ": {}: {}", self.kind, self.message)?;
        if let Some(value) = &self.value {
            write!(f, " [value: {:?}]", value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn extend(&mut self, violations: impl IntoIterator<Item = Violation>) {
        self.violations.extend(violations);
    }

    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn count(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} violation(s)", self.violations.len())
    }
}

// ==========================================
// Import report
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableSummary {
    pub sheet: String,
    pub table: String,
    /// In-memory rows considered for the table
    pub rows: usize,
    /// Rows actually sent to the store
    pub inserted: usize,
    pub statements: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub run_id: String,
    pub dry_run: bool,
    pub committed: bool,
    pub tables: Vec<TableSummary>,
    pub entities_created: usize,
    pub entities_reused: usize,
    pub annotations_inserted: usize,
    pub annotations_superseded: usize,
    pub annotations_unchanged: usize,
    pub elapsed_ms: u64,
}

impl ImportReport {
    pub fn table(&self, table: &str) -> Option<&TableSummary> {
        self.tables.iter().find(|t| t.table == table)
    }
}
