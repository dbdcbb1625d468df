//! Staging load errors

use std::path::PathBuf;

use thiserror::Error;

use crate::database::DatabaseError;

/// Errors that can occur while loading staging tables
#[derive(Error, Debug)]
pub enum StagingError {
    /// The backend rejected a statement or insert
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Reading a source file failed
    #[error("IO error on {path}: {error}")]
    Io { path: PathBuf, error: std::io::Error },

    /// A JSONPaths expression could not be parsed
    #[error("Invalid JSONPath expression '{expr}': {reason}")]
    InvalidJsonPath { expr: String, reason: String },

    /// The JSONPaths document doesn't line up with the target table
    #[error("JSONPaths document has {found} paths but {table} has {expected} columns")]
    JsonPathArity {
        table: String,
        expected: usize,
        found: usize,
    },

    /// The source can't be read by local ingestion
    #[error("Unsupported source for local ingestion: {0}")]
    UnsupportedSource(String),

    /// A glob pattern built from the source was invalid
    #[error("Invalid file pattern: {0}")]
    InvalidPattern(String),

    /// More malformed records than the configured tolerance
    #[error("{table}: {rejected} malformed records exceed max_errors = {max_errors}")]
    ErrorThresholdExceeded {
        table: String,
        rejected: usize,
        max_errors: u32,
    },
}

impl StagingError {
    pub(crate) fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        StagingError::Io {
            path: path.into(),
            error,
        }
    }
}
