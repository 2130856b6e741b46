// ==========================================
// Molecular data portal - in-memory tables
// ==========================================
// Role: cell values, sheet tables and the sheet collection that flows
//       through every import stage
// Ownership: a single ImportBatch is handed from stage to stage; stages
//            mutate tables in place and never keep references across stages
// ==========================================

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

// ==========================================
// Value - one cell
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    /// Missing means an empty cell: `Null` or whitespace-only text.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Canonical join / set key. Whole floats collapse onto integers so that a
    /// workbook cell `5.0` and a CSV cell `5` address the same row.
    pub fn as_key(&self) -> Option<String> {
        if self.is_missing() {
            return None;
        }
        Some(match self {
            Value::Text(s) => s.trim().to_string(),
            other => other.to_string(),
        })
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Real(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Integer(0) => Some(false),
            Value::Integer(1) => Some(true),
            Value::Real(f) if *f == 0.0 => Some(false),
            Value::Real(f) if *f == 1.0 => Some(true),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Renders the value as a SQL literal. Used for statement context in
    /// diagnostics; the statements themselves are always parameterised.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) if f.is_nan() => "'NaN'".to_string(),
            Value::Real(f) => f.to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Date(_) | Value::DateTime(_) => format!("'{}'", self),
        }
    }

    /// Converts a mapping-file literal (e.g. a `default`) into a cell value.
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(v) if v.fract() == 0.0 && v.is_finite() && v.abs() < 1e15 => {
                write!(f, "{}", *v as i64)
            }
            Value::Real(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

// ==========================================
// DataTable - one sheet
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl DataTable {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let mut table = Self::new(name, columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    /// Appends a row, padding with `Null` or truncating to the column count.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    pub fn set_value(&mut self, row: usize, column_idx: usize, value: Value) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(column_idx)) {
            *cell = value;
        }
    }

    /// Values of one column in row order, or `None` if the column is absent.
    pub fn column_values(&self, column: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Adds the column if absent and returns its index.
    pub fn ensure_column(&mut self, column: &str) -> usize {
        if let Some(idx) = self.column_index(column) {
            return idx;
        }
        self.columns.push(column.to_string());
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        self.columns.len() - 1
    }

    /// Assigns a whole column (added when absent). Short inputs are padded
    /// with `Null`.
    pub fn set_column(&mut self, column: &str, mut values: Vec<Value>) {
        let idx = self.ensure_column(column);
        values.resize(self.rows.len(), Value::Null);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
    }

    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(&[Value]) -> bool,
    {
        self.rows.retain(|row| keep(row));
    }

    /// Drops rows whose every cell is missing. Returns the number dropped.
    pub fn drop_empty_rows(&mut self) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| !row.iter().all(Value::is_missing));
        before - self.rows.len()
    }

    /// Drops columns without a usable header (empty or spreadsheet-generated
    /// `Unnamed: n`). Returns the dropped headers.
    pub fn drop_unnamed_columns(&mut self) -> Vec<String> {
        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|c| {
                let c = c.trim();
                !c.is_empty() && !c.starts_with("Unnamed")
            })
            .collect();
        if keep.iter().all(|k| *k) {
            return Vec::new();
        }

        let dropped = self
            .columns
            .iter()
            .zip(&keep)
            .filter(|(_, k)| !**k)
            .map(|(c, _)| c.clone())
            .collect();
        self.columns = self
            .columns
            .drain(..)
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(c, _)| c)
            .collect();
        for row in &mut self.rows {
            *row = row
                .drain(..)
                .zip(&keep)
                .filter(|(_, k)| **k)
                .map(|(v, _)| v)
                .collect();
        }
        dropped
    }

    /// Set of non-missing keys in a column (empty if the column is absent).
    pub fn key_set(&self, column: &str) -> HashSet<String> {
        self.column_values(column)
            .map(|values| values.into_iter().filter_map(Value::as_key).collect())
            .unwrap_or_default()
    }

    /// Row index of the first row carrying each key of `column`.
    pub fn index_by(&self, column: &str) -> HashMap<String, usize> {
        let mut index = HashMap::new();
        if let Some(values) = self.column_values(column) {
            for (row, value) in values.into_iter().enumerate() {
                if let Some(key) = value.as_key() {
                    index.entry(key).or_insert(row);
                }
            }
        }
        index
    }

    /// Projection onto `columns` (absent columns become `Null`), keeping only
    /// the first occurrence of each distinct row.
    pub fn distinct_projection(&self, name: &str, columns: &[String]) -> DataTable {
        let indices: Vec<Option<usize>> = columns.iter().map(|c| self.column_index(c)).collect();
        let mut seen: HashSet<Vec<Option<String>>> = HashSet::new();
        let mut projected = DataTable::new(name, columns.to_vec());

        for row in &self.rows {
            let values: Vec<Value> = indices
                .iter()
                .map(|idx| idx.map(|i| row[i].clone()).unwrap_or(Value::Null))
                .collect();
            let key: Vec<Option<String>> = values.iter().map(Value::as_key).collect();
            if seen.insert(key) {
                projected.push_row(values);
            }
        }
        projected
    }
}

// ==========================================
// ImportBatch - every sheet of one import
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ImportBatch {
    sheets: BTreeMap<String, DataTable>,
}

impl ImportBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: DataTable) {
        self.sheets.insert(table.name().to_string(), table);
    }

    pub fn get(&self, sheet: &str) -> Option<&DataTable> {
        self.sheets.get(sheet)
    }

    pub fn get_mut(&mut self, sheet: &str) -> Option<&mut DataTable> {
        self.sheets.get_mut(sheet)
    }

    pub fn contains(&self, sheet: &str) -> bool {
        self.sheets.contains_key(sheet)
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.keys().map(String::as_str)
    }

    pub fn tables(&self) -> impl Iterator<Item = &DataTable> {
        self.sheets.values()
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }
}
