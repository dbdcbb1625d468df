//! Embedded DuckDB session
//!
//! Runs the whole pipeline in-process: local loads, development and the
//! integration tests. Staging data always arrives through local ingestion.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{
    DatabaseBackend, DatabaseError, DatabaseResult, QueryResult, SqlDialect, SqlValue,
    check_row_widths,
};

/// Warehouse held in a DuckDB file or in memory
pub struct DuckDBBackend {
    db_path: Option<PathBuf>,
    /// Single session; every statement takes the lock
    connection: Mutex<duckdb::Connection>,
}

impl DuckDBBackend {
    /// Open (or create) a warehouse file
    pub fn new(db_path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let connection = duckdb::Connection::open(&path).map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Cannot open {}: {}", path.display(), e))
        })?;

        Ok(Self {
            db_path: Some(path),
            connection: Mutex::new(connection),
        })
    }

    /// Warehouse that disappears with the backend
    pub fn in_memory() -> DatabaseResult<Self> {
        let connection = duckdb::Connection::open_in_memory().map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Cannot open in-memory warehouse: {}", e))
        })?;

        Ok(Self {
            db_path: None,
            connection: Mutex::new(connection),
        })
    }

    /// Open the backend described by a configured path (`:memory:` for in-memory)
    pub fn open(path: Option<&Path>) -> DatabaseResult<Self> {
        match path {
            Some(path) => Self::new(path),
            None => Self::in_memory(),
        }
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path.is_none()
    }

    fn lock(&self) -> DatabaseResult<MutexGuard<'_, duckdb::Connection>> {
        self.connection
            .lock()
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Lock error: {}", e)))
    }

    /// One result row as a JSON object keyed by column name
    fn row_to_object(row: &duckdb::Row, columns: &[String]) -> serde_json::Value {
        let object = columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let cell = row
                    .get_ref(i)
                    .map(Self::cell_to_json)
                    .unwrap_or(serde_json::Value::Null);
                (name.clone(), cell)
            })
            .collect();

        serde_json::Value::Object(object)
    }

    fn cell_to_json(cell: duckdb::types::ValueRef) -> serde_json::Value {
        use duckdb::types::ValueRef;
        use serde_json::Value;

        let float = |f: f64| {
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        };

        match cell {
            ValueRef::Null => Value::Null,
            ValueRef::Boolean(b) => Value::Bool(b),
            ValueRef::TinyInt(i) => Value::from(i),
            ValueRef::SmallInt(i) => Value::from(i),
            ValueRef::Int(i) => Value::from(i),
            ValueRef::BigInt(i) => Value::from(i),
            // SUM over integers returns HUGEINT
            ValueRef::HugeInt(i) => Value::String(i.to_string()),
            ValueRef::UInt(i) => Value::from(i),
            ValueRef::UBigInt(i) => Value::from(i),
            ValueRef::Float(f) => float(f as f64),
            ValueRef::Double(f) => float(f),
            ValueRef::Decimal(d) => Value::String(d.to_string()),
            ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => {
                use base64::Engine;
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            ValueRef::Timestamp(unit, v) => Self::timestamp_to_json(unit, v),
            other => Value::String(format!("{:?}", other)),
        }
    }

    fn timestamp_to_json(unit: duckdb::types::TimeUnit, value: i64) -> serde_json::Value {
        use duckdb::types::TimeUnit;

        let micros = match unit {
            TimeUnit::Second => value.saturating_mul(1_000_000),
            TimeUnit::Millisecond => value.saturating_mul(1_000),
            TimeUnit::Microsecond => value,
            TimeUnit::Nanosecond => value / 1_000,
        };

        match chrono::DateTime::from_timestamp_micros(micros) {
            Some(ts) => serde_json::Value::String(
                ts.naive_utc()
                    .format(super::value::TIMESTAMP_FORMAT)
                    .to_string(),
            ),
            None => serde_json::Value::Null,
        }
    }
}

/// Multi-row INSERT with one `?` per cell
fn insert_sql(table: &str, columns: &[&str], row_count: usize) -> String {
    let row = format!("({})", vec!["?"; columns.len()].join(", "));
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        columns.join(", "),
        vec![row; row_count].join(", ")
    )
}

impl duckdb::ToSql for SqlValue {
    fn to_sql(&self) -> duckdb::Result<duckdb::types::ToSqlOutput<'_>> {
        use duckdb::types::{TimeUnit, ToSqlOutput, Value};

        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Bool(b) => ToSqlOutput::Owned(Value::Boolean(*b)),
            SqlValue::Int(i) => ToSqlOutput::Owned(Value::BigInt(*i)),
            SqlValue::Float(f) => ToSqlOutput::Owned(Value::Double(*f)),
            SqlValue::Text(s) => ToSqlOutput::Owned(Value::Text(s.clone())),
            SqlValue::Timestamp(ts) => ToSqlOutput::Owned(Value::Timestamp(
                TimeUnit::Microsecond,
                ts.and_utc().timestamp_micros(),
            )),
        })
    }
}

#[async_trait(?Send)]
impl DatabaseBackend for DuckDBBackend {
    async fn execute(&self, sql: &str) -> DatabaseResult<u64> {
        let conn = self.lock()?;

        conn.execute(sql, [])
            .map(|n| n as u64)
            .map_err(|e| DatabaseError::QueryFailed(format!("Execute failed: {}", e)))
    }

    async fn execute_batch(&self, sql: &str) -> DatabaseResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(sql)
            .map_err(|e| DatabaseError::QueryFailed(format!("Batch execute failed: {}", e)))
    }

    async fn execute_query(&self, sql: &str) -> DatabaseResult<QueryResult> {
        let start = std::time::Instant::now();
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| DatabaseError::QueryFailed(format!("Prepare failed: {}", e)))?;

        // Column names are only known once the statement has run
        let mut result_rows = stmt
            .query([])
            .map_err(|e| DatabaseError::QueryFailed(format!("Query failed: {}", e)))?;

        let column_count = result_rows.as_ref().map(|r| r.column_count()).unwrap_or(0);
        let columns: Vec<String> = (0..column_count)
            .map(|i| {
                result_rows
                    .as_ref()
                    .and_then(|r| r.column_name(i).ok())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("col{}", i))
            })
            .collect();

        let mut rows = Vec::new();
        while let Some(row) = result_rows
            .next()
            .map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))?
        {
            rows.push(Self::row_to_object(row, &columns));
        }

        Ok(QueryResult {
            columns,
            rows,
            rows_affected: None,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn insert_rows(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<SqlValue>],
        batch_size: usize,
    ) -> DatabaseResult<u64> {
        check_row_widths(table, columns, rows)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| DatabaseError::QueryFailed(format!("Begin failed: {}", e)))?;

        let mut inserted = 0u64;
        for chunk in rows.chunks(batch_size.max(1)) {
            let sql = insert_sql(table, columns, chunk.len());
            let mut stmt = tx
                .prepare(&sql)
                .map_err(|e| DatabaseError::QueryFailed(format!("Prepare failed: {}", e)))?;

            // Dropping `tx` on error rolls back every earlier chunk
            inserted += stmt
                .execute(duckdb::params_from_iter(chunk.iter().flatten()))
                .map_err(|e| DatabaseError::QueryFailed(format!("Insert failed: {}", e)))?
                as u64;
        }

        tx.commit()
            .map_err(|e| DatabaseError::QueryFailed(format!("Commit failed: {}", e)))?;

        Ok(inserted)
    }

    async fn health_check(&self) -> DatabaseResult<bool> {
        let result = self.execute_query("SELECT 1 as healthy").await?;
        Ok(!result.rows.is_empty())
    }

    fn backend_type(&self) -> &'static str {
        "duckdb"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::DuckDb
    }

    async fn close(&self) -> DatabaseResult<()> {
        // Dropping the backend closes the connection
        Ok(())
    }
}
