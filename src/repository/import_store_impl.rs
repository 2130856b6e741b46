// ==========================================
// Molecular data portal - SQLite import store
// ==========================================
// One instance = one IMMEDIATE transaction. Dropping it without commit
// rolls everything back.
// ==========================================

use crate::domain::annotation::{AnnotationFacts, AnnotationStatus, StoredAnnotation};
use crate::domain::table::Value;
use crate::importer::field_mapper::{InsertStatement, MAX_BIND_VARIABLES};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::import_store::{AnnotationQuery, ImportSession, ImportStore};
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql, Transaction, TransactionBehavior};
use tracing::trace;

// ==========================================
// Value ↔ SQLite
// ==========================================

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Date(d) => ToSqlOutput::Owned(SqlValue::Text(d.format("%Y-%m-%d").to_string())),
            Value::DateTime(dt) => ToSqlOutput::Owned(SqlValue::Text(
                dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            )),
        })
    }
}

fn from_sql_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).to_string())
        }
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// ==========================================
// SqliteImportStore
// ==========================================
pub struct SqliteImportStore<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> SqliteImportStore<'conn> {
    /// Opens an IMMEDIATE transaction, taking the write lock up front.
    pub fn begin(conn: &'conn mut Connection) -> RepositoryResult<Self> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(Self { tx })
    }
}

impl ImportStore for SqliteImportStore<'_> {
    fn insert_rows(
        &mut self,
        statement: &InsertStatement,
        rows: &[Vec<Value>],
    ) -> RepositoryResult<Vec<Vec<Value>>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let sql = statement.to_sql(rows.len());
        trace!(sql = %sql, "insert statement");
        let mut prepared = self.tx.prepare(&sql)?;
        let params = params_from_iter(rows.iter().flatten());

        if statement.returning.is_empty() {
            prepared.execute(params)?;
            return Ok(Vec::new());
        }

        let width = statement.returning.len();
        let mut cursor = prepared.query(params)?;
        let mut returned = Vec::with_capacity(rows.len());
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sql_ref(row.get_ref(i)?));
            }
            returned.push(values);
        }
        Ok(returned)
    }

    fn max_id(&mut self, table: &str, column: &str) -> RepositoryResult<i64> {
        let sql = format!(
            "SELECT COALESCE(MAX({}), 0) FROM {}",
            quote(column),
            quote(table)
        );
        let max: i64 = self.tx.query_row(&sql, [], |row| row.get(0))?;
        Ok(max)
    }

    fn valid_annotations(
        &mut self,
        query: &AnnotationQuery,
        entity_ids: &[i64],
    ) -> RepositoryResult<Vec<StoredAnnotation>> {
        let mut columns = vec![
            quote(&query.id_column),
            quote(&query.entity_column),
            quote(&query.target_column),
            quote(&query.prediction_column),
        ];
        columns.extend(query.record_columns.iter().map(|c| quote(c)));

        let mut found = Vec::new();
        for chunk in entity_ids.chunks(MAX_BIND_VARIABLES - 1) {
            let sql = format!(
                "SELECT {} FROM {} WHERE {} = ? AND {} IN ({}) ORDER BY {}",
                columns.join(", "),
                quote(&query.table),
                quote(&query.status_column),
                quote(&query.entity_column),
                placeholders(chunk.len()),
                quote(&query.id_column),
            );

            let mut params: Vec<SqlValue> = Vec::with_capacity(chunk.len() + 1);
            params.push(SqlValue::Text(AnnotationStatus::Valid.as_str().to_string()));
            params.extend(chunk.iter().map(|id| SqlValue::Integer(*id)));

            let mut prepared = self.tx.prepare(&sql)?;
            let mut cursor = prepared.query(params_from_iter(params.iter()))?;
            while let Some(row) = cursor.next()? {
                let target = from_sql_ref(row.get_ref(2)?);
                let prediction = from_sql_ref(row.get_ref(3)?);
                let record = query
                    .record_columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| Ok((c.clone(), from_sql_ref(row.get_ref(4 + i)?).as_key())))
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                found.push(StoredAnnotation {
                    id: row.get(0)?,
                    entity_id: row.get(1)?,
                    facts: AnnotationFacts {
                        target: target.as_key().unwrap_or_default(),
                        prediction: prediction.as_bool().unwrap_or(false),
                    },
                    record,
                });
            }
        }
        Ok(found)
    }

    fn supersede_annotations(
        &mut self,
        query: &AnnotationQuery,
        ids: &[i64],
    ) -> RepositoryResult<usize> {
        let mut changed = 0;
        for chunk in ids.chunks(MAX_BIND_VARIABLES - 2) {
            let sql = format!(
                "UPDATE {} SET {} = ? WHERE {} = ? AND {} IN ({})",
                quote(&query.table),
                quote(&query.status_column),
                quote(&query.status_column),
                quote(&query.id_column),
                placeholders(chunk.len()),
            );

            let mut params: Vec<SqlValue> = vec![
                SqlValue::Text(AnnotationStatus::Superseded.as_str().to_string()),
                SqlValue::Text(AnnotationStatus::Valid.as_str().to_string()),
            ];
            params.extend(chunk.iter().map(|id| SqlValue::Integer(*id)));

            changed += self.tx.execute(&sql, params_from_iter(params.iter()))?;
        }
        Ok(changed)
    }
}

impl ImportSession for SqliteImportStore<'_> {
    fn commit(self) -> RepositoryResult<()> {
        self.tx
            .commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))
    }

    fn rollback(self) -> RepositoryResult<()> {
        self.tx
            .rollback()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE asv (pid INTEGER PRIMARY KEY, asv_id TEXT UNIQUE, asv_sequence TEXT UNIQUE);
             CREATE TABLE taxon_annotation (
                 pid INTEGER PRIMARY KEY, asv_pid INTEGER, status TEXT,
                 annotation_target TEXT, target_prediction INTEGER, genus TEXT);",
        )
        .unwrap();
        conn
    }

    fn upsert() -> InsertStatement {
        InsertStatement {
            table: "asv".into(),
            columns: vec!["asv_id".into(), "asv_sequence".into()],
            conflict_key: Some("asv_sequence".into()),
            returning: vec!["pid".into(), "asv_sequence".into()],
        }
    }

    fn query() -> AnnotationQuery {
        AnnotationQuery {
            table: "taxon_annotation".into(),
            id_column: "pid".into(),
            entity_column: "asv_pid".into(),
            target_column: "annotation_target".into(),
            prediction_column: "target_prediction".into(),
            status_column: "status".into(),
            record_columns: vec!["genus".into()],
        }
    }

    #[test]
    fn test_upsert_returns_existing_id() {
        let mut conn = conn();
        let mut store = SqliteImportStore::begin(&mut conn).unwrap();
        let rows = vec![vec![Value::from("ASV:1"), Value::from("ACGT")]];

        let first = store.insert_rows(&upsert(), &rows).unwrap();
        let second = store.insert_rows(&upsert(), &rows).unwrap();

        assert_eq!(first, vec![vec![Value::Integer(1), Value::from("ACGT")]]);
        assert_eq!(first, second);
        assert_eq!(store.max_id("asv", "pid").unwrap(), 1);
        store.commit().unwrap();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM asv", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_rollback_discards_inserts() {
        let mut conn = conn();
        {
            let mut store = SqliteImportStore::begin(&mut conn).unwrap();
            store
                .insert_rows(&upsert(), &[vec![Value::from("ASV:1"), Value::from("ACGT")]])
                .unwrap();
            store.rollback().unwrap();
        }
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM asv", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_valid_annotations_and_supersede() {
        let mut conn = conn();
        conn.execute_batch(
            "INSERT INTO taxon_annotation VALUES (1, 7, 'valid', '16S', 0, 'Nitrospira');
             INSERT INTO taxon_annotation VALUES (2, 7, 'superseded', '18S', 1, NULL);
             INSERT INTO taxon_annotation VALUES (3, 8, 'valid', '16S', 1, NULL);",
        )
        .unwrap();
        let mut store = SqliteImportStore::begin(&mut conn).unwrap();

        let found = store.valid_annotations(&query(), &[7]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 1);
        assert_eq!(found[0].facts.target, "16S");
        assert!(!found[0].facts.prediction);
        assert_eq!(found[0].record, vec![("genus".to_string(), Some("Nitrospira".to_string()))]);

        assert_eq!(store.supersede_annotations(&query(), &[1, 2]).unwrap(), 1);
        assert!(store.valid_annotations(&query(), &[7]).unwrap().is_empty());
        assert_eq!(store.max_id("taxon_annotation", "pid").unwrap(), 3);
    }

    #[test]
    fn test_insert_without_returning() {
        let mut conn = conn();
        let mut store = SqliteImportStore::begin(&mut conn).unwrap();
        let statement = InsertStatement {
            table: "asv".into(),
            columns: vec!["asv_id".into(), "asv_sequence".into()],
            conflict_key: None,
            returning: vec![],
        };

        let out = store
            .insert_rows(
                &statement,
                &[
                    vec![Value::from("ASV:1"), Value::from("A")],
                    vec![Value::from("ASV:2"), Value::from("C")],
                ],
            )
            .unwrap();

        assert!(out.is_empty());
        assert_eq!(store.max_id("asv", "pid").unwrap(), 2);
    }
}
