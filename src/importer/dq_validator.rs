// ==========================================
// Molecular data portal - validator
// ==========================================
// Stages, in order, each over every sheet:
//   1. field presence (declared ↔ present)
//   2. type coercion
//   3. regex patterns      (skippable)
//   4. uniqueness          (skippable)
//   5. cross-sheet key sets (references with joinOn, coveredBy)
// Never stops at the first problem: one run reports everything.
// ==========================================

use crate::domain::mapping::{DataMapping, TableDescriptor};
use crate::domain::report::{ValidationReport, Violation, ViolationKind};
use crate::domain::table::{DataTable, ImportBatch};
use crate::importer::data_cleaner::DataCleaner;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{info, warn};

/// Keys of `a[key_a]` absent from `b[key_b]`, sorted.
pub fn compare_key_sets(a: &DataTable, key_a: &str, b: &DataTable, key_b: &str) -> BTreeSet<String> {
    let present = b.key_set(key_b);
    a.key_set(key_a)
        .into_iter()
        .filter(|k| !present.contains(k))
        .collect()
}

pub struct Validator<'a> {
    mapping: &'a DataMapping,
    check_patterns: bool,
}

impl<'a> Validator<'a> {
    pub fn new(mapping: &'a DataMapping) -> Self {
        Self {
            mapping,
            check_patterns: true,
        }
    }

    /// Disables regex and uniqueness checks. Presence, coercion and key-set
    /// checks always run since insertion relies on them.
    pub fn skip_patterns(mut self) -> Self {
        self.check_patterns = false;
        self
    }

    /// Validates (and coerces) the batch in place.
    pub fn validate(&self, batch: &mut ImportBatch) -> ValidationReport {
        let mut report = ValidationReport::new();

        for (descriptor, table) in self.present(batch) {
            report.extend(self.check_presence(table, descriptor));
        }

        for descriptor in self.mapping.tables() {
            if let Some(table) = batch.get_mut(&descriptor.alias) {
                report.extend(DataCleaner::coerce_table(table, descriptor));
            }
        }

        if self.check_patterns {
            for (descriptor, table) in self.present(batch) {
                report.extend(self.check_pattern_fields(table, descriptor));
                report.extend(self.check_unique_fields(table, descriptor));
            }
        } else {
            info!("pattern and uniqueness checks skipped");
        }

        report.extend(self.check_key_sets(batch));

        for violation in &report.violations {
            warn!("{}", violation);
        }
        if report.is_valid() {
            info!("validation successful");
        }
        report
    }

    fn present<'b>(&self, batch: &'b ImportBatch) -> Vec<(&'a TableDescriptor, &'b DataTable)> {
        self.mapping
            .tables()
            .iter()
            .filter_map(|d| batch.get(&d.alias).map(|t| (d, t)))
            .collect()
    }

    // ===== 1. presence =====

    fn check_presence(&self, table: &DataTable, descriptor: &TableDescriptor) -> Vec<Violation> {
        let mut violations = Vec::new();
        let join_columns: Vec<&str> = descriptor
            .fields
            .iter()
            .filter_map(|f| f.references.as_ref()?.join_on.as_deref())
            .collect();

        let mut required: Vec<&str> = descriptor
            .fields
            .iter()
            .filter(|f| f.is_required_input())
            .map(|f| f.name.as_str())
            .collect();
        for column in &join_columns {
            if !required.contains(column) {
                required.push(*column);
            }
        }

        for field in required {
            if !table.has_column(field) {
                violations.push(Violation::new(
                    table.name(),
                    field,
                    ViolationKind::MissingField,
                    "declared field is missing from the input",
                ));
            }
        }

        // Columns of derived sheets come from the mapping itself, and the
        // non-id columns of a wide sheet are its variables.
        if descriptor.is_read_from_input() && descriptor.unpivot.is_none() {
            let mut known: HashSet<&str> = descriptor.fields.iter().map(|f| f.name.as_str()).collect();
            known.extend(join_columns);
            for field in &descriptor.fields {
                if let Some(derive) = &field.derive {
                    known.extend(derive.sources());
                }
            }

            for column in table.columns() {
                if !known.contains(column.as_str()) {
                    violations.push(Violation::new(
                        table.name(),
                        column,
                        ViolationKind::UnexpectedField,
                        "input field is not declared in the mapping",
                    ));
                }
            }
        }
        violations
    }

    // ===== 3. regex =====

    fn check_pattern_fields(&self, table: &DataTable, descriptor: &TableDescriptor) -> Vec<Violation> {
        let mut violations = Vec::new();

        for field in descriptor.fields.iter().filter(|f| f.validation.is_some()) {
            let Some(values) = table.column_values(&field.name) else {
                continue;
            };
            let pattern = field.pattern.as_deref().unwrap_or_default();

            for (row, value) in values.into_iter().enumerate() {
                // Defaults are injected after validation
                if value.is_missing() && field.default.is_some() {
                    continue;
                }
                let text = if value.is_missing() {
                    String::new()
                } else {
                    value.to_string()
                };
                if !field.matches(&text) {
                    violations.push(
                        Violation::new(
                            table.name(),
                            &field.name,
                            ViolationKind::PatternMismatch,
                            format!("value does not match \"{}\"", pattern),
                        )
                        .at_row(row)
                        .with_value(text),
                    );
                }
            }
        }
        violations
    }

    // ===== 4. uniqueness =====

    fn check_unique_fields(&self, table: &DataTable, descriptor: &TableDescriptor) -> Vec<Violation> {
        let mut violations = Vec::new();

        for field in descriptor.fields.iter().filter(|f| f.unique) {
            let Some(values) = table.column_values(&field.name) else {
                continue;
            };
            let mut first_seen: HashMap<String, usize> = HashMap::new();
            for (row, value) in values.into_iter().enumerate() {
                let Some(key) = value.as_key() else {
                    continue;
                };
                if let Some(first) = first_seen.get(&key) {
                    violations.push(
                        Violation::new(
                            table.name(),
                            &field.name,
                            ViolationKind::DuplicateValue,
                            format!("value already used on row {}", first + 2),
                        )
                        .at_row(row)
                        .with_value(key),
                    );
                } else {
                    first_seen.insert(key, row);
                }
            }
        }
        violations
    }

    // ===== 5. key sets =====

    fn check_key_sets(&self, batch: &ImportBatch) -> Vec<Violation> {
        let mut violations = Vec::new();
        let empty = DataTable::new("", Vec::new());

        for (descriptor, table) in self.present(batch) {
            for field in &descriptor.fields {
                let Some(reference) = &field.references else {
                    continue;
                };
                let Some(join_on) = &reference.join_on else {
                    continue;
                };
                let parent_alias = self
                    .mapping
                    .alias_for_table(&reference.table)
                    .unwrap_or(reference.table.as_str());
                let parent = batch.get(parent_alias).unwrap_or(&empty);

                for missing in compare_key_sets(table, join_on, parent, join_on) {
                    violations.push(
                        Violation::new(
                            table.name(),
                            join_on.as_str(),
                            ViolationKind::MissingKey,
                            format!("value not present in {} sheet", parent_alias),
                        )
                        .with_value(missing),
                    );
                }
            }

            for rule in &descriptor.covered_by {
                let other = batch.get(&rule.sheet).unwrap_or(&empty);
                for missing in compare_key_sets(table, &rule.field, other, &rule.key) {
                    violations.push(
                        Violation::new(
                            table.name(),
                            rule.field.as_str(),
                            ViolationKind::MissingKey,
                            format!("value has no counterpart in {} sheet", rule.sheet),
                        )
                        .with_value(missing),
                    );
                }
            }
        }
        violations
    }
}
