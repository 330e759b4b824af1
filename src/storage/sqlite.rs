use super::traits::RecordStore;
use crate::constants::{CD_NOM_FIELD, OUTPUT_FIELDS};
use crate::error::{Result, TaxrefError};
use crate::types::{FieldValues, RowId, StoreRow};
use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde_json::{Number, Value};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Observation table inside a SQLite database, addressed by `rowid`
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
    table: String,
}

impl SqliteRecordStore {
    pub fn open<P: AsRef<Path>>(db_path: P, table: &str) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())?;
        Self::from_connection(conn, table)
    }

    pub fn from_connection(conn: Connection, table: &str) -> Result<Self> {
        let exists: i64 = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(TaxrefError::Store(format!("table '{}' does not exist", table)));
        }
        Ok(Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Add whichever output columns the table lacks. Returns the added names.
    pub fn ensure_output_fields(&self) -> Result<Vec<String>> {
        let existing = self.column_names()?;
        let conn = self.conn.lock().unwrap();
        let mut added = Vec::new();
        for field in OUTPUT_FIELDS {
            // SQLite column names are case-insensitive
            if existing.iter().any(|c| c.eq_ignore_ascii_case(field)) {
                continue;
            }
            let sql_type = if field == CD_NOM_FIELD { "INTEGER" } else { "TEXT" };
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_ident(&self.table),
                quote_ident(field),
                sql_type
            ))?;
            info!(table = %self.table, field, "Added output column");
            added.push(field.to_string());
        }
        Ok(added)
    }

    fn column_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(&self.table)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn schema(&self) -> Result<Vec<String>> {
        self.column_names()
    }

    async fn read_all_records(&self, fields: &[String]) -> Result<Vec<StoreRow>> {
        let columns: Vec<String> = std::iter::once("rowid".to_string())
            .chain(fields.iter().map(|f| quote_ident(f)))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            columns.join(", "),
            quote_ident(&self.table)
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let mut record = StoreRow::new(row.get::<_, i64>(0)?);
                for (i, field) in fields.iter().enumerate() {
                    let value = json_from_sql(row.get_ref(i + 1)?);
                    record.values.insert(field.clone(), value);
                }
                Ok(record)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug!(table = %self.table, rows = rows.len(), "Read records");
        Ok(rows)
    }

    async fn begin_edit_session(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        if !conn.is_autocommit() {
            return Err(TaxrefError::Store("edit session already open".to_string()));
        }
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    async fn write_fields(&self, row_id: RowId, values: &FieldValues) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let assignments: Vec<String> = values
            .keys()
            .enumerate()
            .map(|(i, field)| format!("{} = ?{}", quote_ident(field), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE rowid = ?{}",
            quote_ident(&self.table),
            assignments.join(", "),
            values.len() + 1
        );
        let params: Vec<SqlValue> = values
            .values()
            .map(sql_from_json)
            .chain(std::iter::once(SqlValue::Integer(row_id)))
            .collect();

        let conn = self.conn.lock().unwrap();
        if conn.is_autocommit() {
            return Err(TaxrefError::Store("no edit session open".to_string()));
        }
        let updated = conn.execute(&sql, params_from_iter(params))?;
        if updated != 1 {
            return Err(TaxrefError::Store(format!("row {} not found in '{}'", row_id, self.table)));
        }
        Ok(())
    }

    async fn commit_edit_session(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("COMMIT")?;
        Ok(())
    }

    async fn rollback_edit_session(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    async fn notify_changed(&self, row_id: RowId) -> Result<()> {
        debug!(table = %self.table, row_id, "Row updated");
        Ok(())
    }

    async fn publish(&self) -> Result<()> {
        info!(table = %self.table, "Observation table finalized");
        Ok(())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn json_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    }
}

fn sql_from_json(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
