// ==========================================
// Molecular data portal - data cleaner
// ==========================================
// Stages: type coercion (during validation), default injection (after it)
// Missing: empty cell, whitespace-only text, or absent column
// ==========================================

use crate::domain::mapping::{FieldType, TableDescriptor};
use crate::domain::report::{Violation, ViolationKind};
use crate::domain::table::{DataTable, Value};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

pub struct DataCleaner;

impl DataCleaner {
    /// Converts one value to `field_type`. Missing values stay `Null`.
    pub fn coerce(value: &Value, field_type: FieldType) -> Result<Value, String> {
        if value.is_missing() {
            return Ok(Value::Null);
        }

        let converted = match field_type {
            FieldType::Text => Some(Value::Text(value.to_string())),
            FieldType::Integer => value.as_i64().map(Value::Integer),
            FieldType::Number => value.as_f64().map(Value::Real),
            FieldType::Boolean => value.as_bool().map(Value::Bool),
            FieldType::Date => Self::to_date(value).map(Value::Date),
            FieldType::DateTime => Self::to_datetime(value).map(Value::DateTime),
        };

        converted.ok_or_else(|| format!("cannot convert {:?} to {}", value.to_string(), field_type))
    }

    fn to_date(value: &Value) -> Option<NaiveDate> {
        match value {
            Value::Date(d) => Some(*d),
            Value::DateTime(dt) => Some(dt.date()),
            Value::Text(s) => {
                let s = s.trim();
                DATE_FORMATS
                    .iter()
                    .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                    .or_else(|| Self::parse_datetime(s).map(|dt| dt.date()))
            }
            _ => None,
        }
    }

    fn to_datetime(value: &Value) -> Option<NaiveDateTime> {
        match value {
            Value::DateTime(dt) => Some(*dt),
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::Text(s) => {
                let s = s.trim();
                Self::parse_datetime(s).or_else(|| {
                    DATE_FORMATS
                        .iter()
                        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
            }
            _ => None,
        }
    }

    fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
        DATETIME_FORMATS
            .iter()
            .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
    }

    /// Coerces every typed field present in `table` in place. Unconvertible
    /// cells are left untouched and reported.
    pub fn coerce_table(table: &mut DataTable, descriptor: &TableDescriptor) -> Vec<Violation> {
        let mut violations = Vec::new();

        for field in &descriptor.fields {
            let Some(field_type) = field.field_type else {
                continue;
            };
            let Some(idx) = table.column_index(&field.name) else {
                continue;
            };

            for row in 0..table.len() {
                let current = table.rows()[row][idx].clone();
                match Self::coerce(&current, field_type) {
                    Ok(converted) => table.set_value(row, idx, converted),
                    Err(message) => violations.push(
                        Violation::new(table.name(), &field.name, ViolationKind::TypeMismatch, message)
                            .at_row(row)
                            .with_value(current.to_string()),
                    ),
                }
            }
        }
        violations
    }

    /// Fills missing values of defaulted fields; absent columns are added.
    /// An empty or blank cell counts as absent and receives the default.
    /// Present values are never overwritten.
    pub fn apply_defaults(table: &mut DataTable, descriptor: &TableDescriptor) -> usize {
        let mut filled = 0;

        for field in &descriptor.fields {
            let Some(default) = &field.default else {
                continue;
            };
            let idx = table.ensure_column(&field.name);
            for row in 0..table.len() {
                if table.rows()[row][idx].is_missing() {
                    table.set_value(row, idx, default.clone());
                    filled += 1;
                }
            }
        }

        if filled > 0 {
            debug!(sheet = table.name(), filled, "defaults applied");
        }
        filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::mapping_loader::load_mapping_str;

    #[test]
    fn test_coerce_per_type() {
        assert_eq!(
            DataCleaner::coerce(&Value::from(" 42 "), FieldType::Integer),
            Ok(Value::Integer(42))
        );
        assert_eq!(
            DataCleaner::coerce(&Value::Real(3.0), FieldType::Integer),
            Ok(Value::Integer(3))
        );
        assert_eq!(
            DataCleaner::coerce(&Value::from("1.5"), FieldType::Number),
            Ok(Value::Real(1.5))
        );
        assert_eq!(
            DataCleaner::coerce(&Value::from("TRUE"), FieldType::Boolean),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            DataCleaner::coerce(&Value::Real(5.0), FieldType::Text),
            Ok(Value::from("5"))
        );
        assert_eq!(
            DataCleaner::coerce(&Value::from(""), FieldType::Integer),
            Ok(Value::Null)
        );
        assert!(DataCleaner::coerce(&Value::from("abc"), FieldType::Number).is_err());
    }

    #[test]
    fn test_coerce_dates() {
        let date = NaiveDate::from_ymd_opt(2021, 2, 1).unwrap();
        let midnight = date.and_hms_opt(0, 0, 0).unwrap();

        assert_eq!(
            DataCleaner::coerce(&Value::from("2021-02-01"), FieldType::Date),
            Ok(Value::Date(date))
        );
        assert_eq!(
            DataCleaner::coerce(&Value::DateTime(midnight), FieldType::Date),
            Ok(Value::Date(date))
        );
        assert_eq!(
            DataCleaner::coerce(&Value::from("2021-02-01"), FieldType::DateTime),
            Ok(Value::DateTime(midnight))
        );
        assert_eq!(
            DataCleaner::coerce(&Value::from("2021-02-01T00:00:00"), FieldType::DateTime),
            Ok(Value::DateTime(midnight))
        );
        assert!(DataCleaner::coerce(&Value::from("2021-13-01"), FieldType::Date).is_err());
    }

    #[test]
    fn test_coerce_table_reports_every_bad_cell() {
        let mapping = load_mapping_str(r#"{"emof": {"measurementValue": {"type": "number"}}}"#)
            .unwrap();
        let mut table = DataTable::with_rows(
            "emof",
            vec!["measurementValue".into()],
            vec![
                vec![Value::from("7.2")],
                vec![Value::from("high")],
                vec![Value::from("low")],
            ],
        );

        let violations = DataCleaner::coerce_table(&mut table, mapping.get("emof").unwrap());

        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].row, Some(3));
        assert_eq!(table.value(0, "measurementValue"), Some(&Value::Real(7.2)));
        assert_eq!(table.value(1, "measurementValue"), Some(&Value::from("high")));
    }

    #[test]
    fn test_defaults_fill_missing_and_absent_columns() {
        let mapping = load_mapping_str(
            r#"{"annotation": {"status": {"default": "valid"},
                               "reference_db": {"default": "SILVA"}}}"#,
        )
        .unwrap();
        let mut table = DataTable::with_rows(
            "annotation",
            vec!["status".into()],
            vec![vec![Value::Null], vec![Value::from("superseded")]],
        );

        let filled = DataCleaner::apply_defaults(&mut table, mapping.get("annotation").unwrap());

        assert_eq!(filled, 3);
        assert_eq!(table.value(0, "status"), Some(&Value::from("valid")));
        assert_eq!(table.value(1, "status"), Some(&Value::from("superseded")));
        assert_eq!(table.value(1, "reference_db"), Some(&Value::from("SILVA")));
    }

    #[test]
    fn test_defaults_fill_empty_cells() {
        let mapping = load_mapping_str(r#"{"annotation": {"status": {"default": "valid"}}}"#).unwrap();
        let mut table = DataTable::with_rows(
            "annotation",
            vec!["status".into()],
            vec![vec![Value::from("")], vec![Value::from("  ")], vec![Value::from("superseded")]],
        );

        let filled = DataCleaner::apply_defaults(&mut table, mapping.get("annotation").unwrap());

        assert_eq!(filled, 2);
        assert_eq!(table.value(0, "status"), Some(&Value::from("valid")));
        assert_eq!(table.value(1, "status"), Some(&Value::from("valid")));
        assert_eq!(table.value(2, "status"), Some(&Value::from("superseded")));
    }
}
