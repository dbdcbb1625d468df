//! Database backend abstraction
//!
//! This module provides the session every pipeline statement runs through:
//! - DuckDB: embedded database for local loads and tests
//! - PostgreSQL: wire-protocol client, also used to reach Redshift
//!
//! Statements are issued one at a time on a single session. Transaction and
//! isolation semantics are whatever the engine gives a single statement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(feature = "duckdb-backend")]
pub mod duckdb;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

pub mod value;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDBBackend;

#[cfg(feature = "postgres-backend")]
pub use self::postgres::PostgresBackend;

pub use value::SqlValue;

/// Check every row carries one value per column
pub(crate) fn check_row_widths(
    table: &str,
    columns: &[&str],
    rows: &[Vec<SqlValue>],
) -> DatabaseResult<()> {
    match rows.iter().find(|r| r.len() != columns.len()) {
        Some(row) => Err(DatabaseError::InvalidInput(format!(
            "Row has {} values for {} columns of {}",
            row.len(),
            columns.len(),
            table
        ))),
        None => Ok(()),
    }
}

/// Error type for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// SQL dialect a statement is rendered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    /// Amazon Redshift
    Redshift,
    /// PostgreSQL
    Postgres,
    /// DuckDB
    DuckDb,
}

impl SqlDialect {
    /// Whether the engine loads staging data with its own `COPY ... FROM` object storage
    pub fn supports_native_copy(&self) -> bool {
        matches!(self, SqlDialect::Redshift)
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlDialect::Redshift => write!(f, "redshift"),
            SqlDialect::Postgres => write!(f, "postgres"),
            SqlDialect::DuckDb => write!(f, "duckdb"),
        }
    }
}

/// Query result row as a JSON value
pub type QueryRow = serde_json::Value;

/// Query result set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Rows of data
    pub rows: Vec<QueryRow>,
    /// Number of rows affected (for INSERT/UPDATE/DELETE)
    pub rows_affected: Option<u64>,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a new query result
    pub fn new(columns: Vec<String>, rows: Vec<QueryRow>) -> Self {
        Self {
            columns,
            rows,
            rows_affected: None,
            execution_time_ms: 0,
        }
    }

    /// Create an empty result
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: None,
            execution_time_ms: 0,
        }
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row as an integer
    ///
    /// Used for `COUNT(*)`-style probes. Integers returned as strings (e.g.
    /// HUGEINT) are parsed.
    pub fn scalar_i64(&self) -> Option<i64> {
        let column = self.columns.first()?;
        let value = self.rows.first()?.get(column)?;
        match value {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Database backend trait for pipeline statements
///
/// All operations are async so the DuckDB and PostgreSQL sessions share one
/// interface; callers still issue statements strictly one after another.
#[async_trait(?Send)]
pub trait DatabaseBackend: Send + Sync {
    /// Execute a single statement that doesn't return rows
    ///
    /// # Returns
    /// Number of rows affected as reported by the engine
    async fn execute(&self, sql: &str) -> DatabaseResult<u64>;

    /// Execute several `;`-separated statements
    async fn execute_batch(&self, sql: &str) -> DatabaseResult<()>;

    /// Execute a SQL query and return results
    async fn execute_query(&self, sql: &str) -> DatabaseResult<QueryResult>;

    /// Insert typed rows into a table, all or nothing
    ///
    /// Rows are sent `batch_size` at a time inside a single transaction, so
    /// a failing batch leaves none of the rows behind.
    ///
    /// # Arguments
    /// * `table` - Table identifier, already quoted if it needs to be
    /// * `columns` - Column names, in the order of each row's values
    /// * `rows` - Row values
    /// * `batch_size` - Rows per INSERT statement
    ///
    /// # Returns
    /// Number of rows inserted
    async fn insert_rows(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<SqlValue>],
        batch_size: usize,
    ) -> DatabaseResult<u64>;

    /// Check if database is healthy and accessible
    async fn health_check(&self) -> DatabaseResult<bool>;

    /// Get the database backend type name
    fn backend_type(&self) -> &'static str;

    /// SQL dialect statements must be rendered in for this backend
    fn dialect(&self) -> SqlDialect;

    /// Close the database connection
    async fn close(&self) -> DatabaseResult<()>;
}
