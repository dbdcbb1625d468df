//! Typed cell values for row inserts

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Format used for timestamp literals
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A single cell bound into an INSERT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// UTC timestamp without zone
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render the value as an inline SQL literal
    ///
    /// Non-finite floats have no portable literal and render as `NULL`.
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(true) => "TRUE".to_string(),
            SqlValue::Bool(false) => "FALSE".to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) if f.is_finite() => f.to_string(),
            SqlValue::Float(_) => "NULL".to_string(),
            SqlValue::Text(s) => quote_literal(s),
            SqlValue::Timestamp(ts) => {
                format!("TIMESTAMP '{}'", ts.format(TIMESTAMP_FORMAT))
            }
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Int(i)
    }
}

impl From<f64> for SqlValue {
    fn from(f: f64) -> Self {
        SqlValue::Float(f)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Quote a string as a SQL literal, doubling embedded single quotes
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
