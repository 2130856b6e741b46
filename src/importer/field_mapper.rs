// ==========================================
// Molecular data portal - schema mapper
// ==========================================
// Role: input field names → destination columns, and parameterised insert
//       statements built once per table from the typed descriptor
// ==========================================

use crate::domain::mapping::{DataMapping, TableDescriptor};
use crate::domain::table::{DataTable, Value};

/// SQLite bind-variable ceiling per statement
pub const MAX_BIND_VARIABLES: usize = 32_766;

/// Converts CamelCase to snake_case.
///
/// `ID` is kept together: `eventID` becomes `event_id`, not `event_i_d`.
/// Existing underscores are not doubled.
pub fn to_snake_case(text: &str) -> String {
    let mut output = String::with_capacity(text.len() + 4);
    let mut prev: Option<char> = None;

    for (i, ch) in text.chars().enumerate() {
        if ch.is_uppercase() && i != 0 {
            let id_suffix = ch == 'D' && prev == Some('I');
            if !id_suffix && prev != Some('_') {
                output.push('_');
            }
        }
        output.extend(ch.to_lowercase());
        prev = Some(ch);
    }
    output
}

/// Rows per statement: bounded by the batch size and the bind ceiling.
pub fn chunk_size(batch_size: usize, column_count: usize) -> usize {
    let by_binds = MAX_BIND_VARIABLES / column_count.max(1);
    batch_size.min(by_binds).max(1)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ==========================================
// InsertStatement
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<String>,
    /// Natural content key for `ON CONFLICT ... DO UPDATE`
    pub conflict_key: Option<String>,
    pub returning: Vec<String>,
}

impl InsertStatement {
    /// SQL text for `row_count` rows of positional parameters.
    pub fn to_sql(&self, row_count: usize) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = format!("({})", vec!["?"; self.columns.len()].join(", "));
        let values = vec![placeholders; row_count.max(1)].join(", ");

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(&self.table),
            columns,
            values
        );

        if let Some(key) = &self.conflict_key {
            let key = quote_ident(key);
            sql.push_str(&format!(
                " ON CONFLICT ({}) DO UPDATE SET {} = excluded.{}",
                key, key, key
            ));
        }

        if !self.returning.is_empty() {
            let returning = self
                .returning
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" RETURNING {}", returning));
        }
        sql
    }

    /// Literal rendering of the first row, for diagnostics.
    pub fn preview(&self, rows: &[Vec<Value>]) -> String {
        let first = rows
            .first()
            .map(|row| {
                row.iter()
                    .map(Value::to_sql_literal)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        format!(
            "INSERT INTO {} ({}) VALUES ({}) [{} row(s)]",
            self.table,
            self.columns.join(", "),
            first,
            rows.len()
        )
    }
}

// ==========================================
// TablePlan - typed insert plan of one sheet
// ==========================================
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub sheet: String,
    /// Input column feeding each statement column
    pub input_fields: Vec<String>,
    pub statement: InsertStatement,
}

impl TablePlan {
    /// Statement rows in table row order. Absent input columns give `Null`.
    pub fn rows(&self, table: &DataTable) -> Vec<Vec<Value>> {
        let indices: Vec<Option<usize>> = self
            .input_fields
            .iter()
            .map(|f| table.column_index(f))
            .collect();

        table
            .rows()
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|idx| idx.map(|i| row[i].clone()).unwrap_or(Value::Null))
                    .collect()
            })
            .collect()
    }
}

// ==========================================
// SchemaMapper
// ==========================================
pub struct SchemaMapper<'a> {
    mapping: &'a DataMapping,
}

impl<'a> SchemaMapper<'a> {
    pub fn new(mapping: &'a DataMapping) -> Self {
        Self { mapping }
    }

    /// Insert plan, or `None` for source-only sheets.
    pub fn plan(&self, alias: &str) -> Option<TablePlan> {
        self.mapping.get(alias).and_then(Self::plan_for)
    }

    pub fn plan_for(descriptor: &TableDescriptor) -> Option<TablePlan> {
        let table = descriptor.target_table.clone()?;
        let (input_fields, columns): (Vec<String>, Vec<String>) = descriptor
            .insert_fields()
            .map(|f| (f.name.clone(), f.target.clone()))
            .unzip();

        let conflict_key = descriptor
            .upsert_key
            .as_ref()
            .and_then(|k| descriptor.field(k))
            .map(|f| f.target.clone());

        let mut returning: Vec<String> = descriptor.returning.iter().cloned().collect();
        if let Some(key) = &conflict_key {
            returning.push(key.clone());
        }

        Some(TablePlan {
            sheet: descriptor.alias.clone(),
            input_fields,
            statement: InsertStatement {
                table,
                columns,
                conflict_key,
                returning,
            },
        })
    }
}
