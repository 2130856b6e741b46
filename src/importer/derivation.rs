// ==========================================
// Molecular data portal - derivation service
// ==========================================
// Structural: unpivot a wide count matrix into long rows (+ distinct
//             projection), run right after reading
// Values: digest / concat columns, run after defaults
// ==========================================

use crate::domain::mapping::{DataMapping, Derivation, TableDescriptor, UnpivotSpec};
use crate::domain::report::{Violation, ViolationKind};
use crate::domain::table::{DataTable, ImportBatch, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

pub struct DerivationService;

impl DerivationService {
    // ==========================================
    // Structural derivation
    // ==========================================

    /// Runs every `unpivot` declared by the mapping, adding the long sheet
    /// and its distinct projection to the batch. Non-numeric counts are
    /// returned as violations, all of them.
    pub fn unpivot_all(batch: &mut ImportBatch, mapping: &DataMapping) -> Vec<Violation> {
        let mut violations = Vec::new();

        for descriptor in mapping.tables() {
            let Some(spec) = &descriptor.unpivot else {
                continue;
            };
            let Some(wide) = batch.get(&descriptor.alias) else {
                continue;
            };

            let (long, mut found) = Self::unpivot(wide, spec);
            violations.append(&mut found);

            if let Some(distinct) = &spec.distinct {
                let projected = long.distinct_projection(&distinct.sheet, &distinct.columns);
                debug!(sheet = %distinct.sheet, rows = projected.len(), "distinct rows derived");
                batch.insert(projected);
            }
            info!(
                source = %descriptor.alias,
                sheet = %spec.into,
                rows = long.len(),
                "sheet unpivoted"
            );
            batch.insert(long);
        }
        violations
    }

    /// Wide → long. Every non-id column contributes one row per input row:
    /// the header goes to `variable_column`, the cell to `value_column`.
    /// Empty cells and counts ≤ 0 are dropped; whole counts become integers.
    pub fn unpivot(wide: &DataTable, spec: &UnpivotSpec) -> (DataTable, Vec<Violation>) {
        let id_indices: Vec<Option<usize>> = spec
            .id_columns
            .iter()
            .map(|c| wide.column_index(c))
            .collect();
        let variables: Vec<(usize, &String)> = wide
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| !spec.id_columns.contains(*c))
            .collect();

        let mut columns = spec.id_columns.clone();
        columns.push(spec.variable_column.clone());
        columns.push(spec.value_column.clone());

        let mut long = DataTable::new(&spec.into, columns);
        let mut violations = Vec::new();

        for (row_idx, row) in wide.rows().iter().enumerate() {
            for (col_idx, header) in &variables {
                let cell = &row[*col_idx];
                if cell.is_missing() {
                    continue;
                }
                let Some(count) = cell.as_f64().filter(|c| !c.is_nan()) else {
                    violations.push(
                        Violation::new(
                            wide.name(),
                            header.as_str(),
                            ViolationKind::NonNumericCount,
                            "count is not numeric",
                        )
                        .at_row(row_idx)
                        .with_value(cell.to_string()),
                    );
                    continue;
                };
                if count <= 0.0 {
                    continue;
                }

                let mut out: Vec<Value> = id_indices
                    .iter()
                    .map(|idx| idx.map(|i| row[i].clone()).unwrap_or(Value::Null))
                    .collect();
                out.push(Value::Text(header.to_string()));
                out.push(if count.fract() == 0.0 {
                    Value::Integer(count as i64)
                } else {
                    Value::Real(count)
                });
                long.push_row(out);
            }
        }
        (long, violations)
    }

    // ==========================================
    // Value derivation
    // ==========================================

    /// `prefix` + lowercase hex SHA-256 of `payload`.
    pub fn content_digest(prefix: &str, payload: &str) -> String {
        let hash = Sha256::digest(payload.as_bytes());
        let mut out = String::with_capacity(prefix.len() + 64);
        out.push_str(prefix);
        for byte in hash {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }

    /// Fills every `derive` field of one sheet.
    pub fn derive_values(table: &mut DataTable, descriptor: &TableDescriptor) {
        for field in &descriptor.fields {
            let Some(derivation) = &field.derive else {
                continue;
            };

            let values: Vec<Value> = (0..table.len())
                .map(|row| Self::derive_one(table, row, derivation))
                .collect();
            table.set_column(&field.name, values);
            debug!(sheet = table.name(), field = %field.name, "values derived");
        }
    }

    fn derive_one(table: &DataTable, row: usize, derivation: &Derivation) -> Value {
        let text = |column: &str| -> Option<String> {
            table
                .value(row, column)
                .filter(|v| !v.is_missing())
                .map(|v| v.to_string())
        };

        match derivation {
            Derivation::Digest { source, prefix } => match text(source) {
                Some(payload) => Value::Text(Self::content_digest(prefix, &payload)),
                None => Value::Null,
            },
            Derivation::Concat { sources, separator } => Value::Text(
                sources
                    .iter()
                    .map(|s| text(s).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(separator),
            ),
        }
    }

    pub fn derive_all(batch: &mut ImportBatch, mapping: &DataMapping) {
        for descriptor in mapping.tables() {
            if let Some(table) = batch.get_mut(&descriptor.alias) {
                Self::derive_values(table, descriptor);
            }
        }
    }
}
