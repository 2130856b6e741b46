// ==========================================
// Molecular data portal - mapping descriptors
// ==========================================
// Role: typed form of the declarative data mapping, produced once by the
//       mapping loader and read by every later stage
// Lookups: sheet alias → descriptor, target table → sheet alias
// ==========================================

use crate::domain::table::Value;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

// ==========================================
// FieldType - declared value type of a field
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Number,
    Boolean,
    Date,
    DateTime,
}

impl FieldType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(FieldType::Text),
            "integer" => Some(FieldType::Integer),
            "number" => Some(FieldType::Number),
            "boolean" => Some(FieldType::Boolean),
            "date" => Some(FieldType::Date),
            "datetime" => Some(FieldType::DateTime),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// ReferenceDescriptor - foreign key resolved in memory
// ==========================================
// With `join_on`: child[join_on] is looked up in parent[join_on] and
// parent[column] is copied. Without it the parent must hold exactly one row,
// whose `column` value is broadcast to every child row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDescriptor {
    pub table: String,
    pub column: String,
    pub join_on: Option<String>,
}

// ==========================================
// Derivation - value computed from other fields of the same row
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Derivation {
    /// Source values joined by `separator`; missing sources count as "".
    Concat {
        sources: Vec<String>,
        separator: String,
    },
    /// `prefix` + lowercase hex SHA-256 of the source value.
    Digest { source: String, prefix: String },
}

impl Derivation {
    pub fn sources(&self) -> Vec<&str> {
        match self {
            Derivation::Concat { sources, .. } => sources.iter().map(String::as_str).collect(),
            Derivation::Digest { source, .. } => vec![source.as_str()],
        }
    }
}

// ==========================================
// FieldDescriptor
// ==========================================
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Input (sheet column) name
    pub name: String,
    /// Destination column name
    pub target: String,
    pub default: Option<Value>,
    /// Source pattern, kept for diagnostics
    pub pattern: Option<String>,
    /// Compiled, anchored for full-value matching
    pub validation: Option<Regex>,
    pub field_type: Option<FieldType>,
    pub unique: bool,
    pub insert: bool,
    pub references: Option<ReferenceDescriptor>,
    pub derive: Option<Derivation>,
}

impl FieldDescriptor {
    /// Fields that must be supplied by the input itself. Defaulted, joined and
    /// derived fields are produced by the pipeline.
    pub fn is_required_input(&self) -> bool {
        self.default.is_none() && self.references.is_none() && self.derive.is_none()
    }

    pub fn matches(&self, text: &str) -> bool {
        self.validation.as_ref().map_or(true, |re| re.is_match(text))
    }
}

// ==========================================
// Sheet-level options
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinctSpec {
    pub sheet: String,
    pub columns: Vec<String>,
}

/// Wide → long reshaping of a count matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpivotSpec {
    pub id_columns: Vec<String>,
    pub variable_column: String,
    pub value_column: String,
    pub into: String,
    pub distinct: Option<DistinctSpec>,
}

/// Every value of `field` in the owning sheet must appear in `sheet.key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageRule {
    pub sheet: String,
    pub key: String,
    pub field: String,
}

/// Destination columns driving annotation reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSpec {
    pub entity_field: String,
    pub target_field: String,
    pub prediction_field: String,
    pub status_field: String,
}

// ==========================================
// TableDescriptor - one sheet
// ==========================================
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub alias: String,
    pub target_table: Option<String>,
    pub returning: Option<String>,
    pub upsert_key: Option<String>,
    pub derived_from: Option<String>,
    pub optional: bool,
    pub unpivot: Option<UnpivotSpec>,
    pub covered_by: Vec<CoverageRule>,
    pub reconcile: Option<ReconcileSpec>,
    pub fields: Vec<FieldDescriptor>,
}

impl TableDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_target(&self, target: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.target == target)
    }

    /// Fields written to the store, in declaration order.
    pub fn insert_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.insert)
    }

    pub fn is_read_from_input(&self) -> bool {
        self.derived_from.is_none()
    }
}

// ==========================================
// DataMapping - the whole document
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct DataMapping {
    tables: Vec<TableDescriptor>,
    by_alias: HashMap<String, usize>,
    by_table: HashMap<String, usize>,
}

impl DataMapping {
    /// Builds both lookups. Callers are expected to have rejected duplicate
    /// target tables already.
    pub fn new(tables: Vec<TableDescriptor>) -> Self {
        let by_alias = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.alias.clone(), i))
            .collect();
        let by_table = tables
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.target_table.clone().map(|name| (name, i)))
            .collect();
        Self {
            tables,
            by_alias,
            by_table,
        }
    }

    /// Descriptors in document order.
    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    pub fn get(&self, alias: &str) -> Option<&TableDescriptor> {
        self.by_alias.get(alias).map(|&i| &self.tables[i])
    }

    pub fn by_target_table(&self, table: &str) -> Option<&TableDescriptor> {
        self.by_table.get(table).map(|&i| &self.tables[i])
    }

    pub fn alias_for_table(&self, table: &str) -> Option<&str> {
        self.by_target_table(table).map(|t| t.alias.as_str())
    }

    /// Target tables that receive rows.
    pub fn target_tables(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter_map(|t| t.target_table.clone())
            .collect()
    }

    /// Reference edges `(child table, parent table)`: the child must be
    /// inserted after the parent.
    pub fn reference_edges(&self) -> Vec<(String, String)> {
        let mut edges = Vec::new();
        for table in &self.tables {
            let Some(child) = &table.target_table else {
                continue;
            };
            for field in &table.fields {
                if let Some(reference) = &field.references {
                    let edge = (child.clone(), reference.table.clone());
                    if !edges.contains(&edge) {
                        edges.push(edge);
                    }
                }
            }
        }
        edges
    }
}
