//! Song Play Warehouse - batch loader for a song-play analytics star schema
//!
//! Provides:
//! - Schema management for two staging tables and five warehouse tables
//! - Bulk-loading of the event log and song catalog into staging
//! - The five transformations that build the fact and dimension tables
//! - Pipeline orchestration and post-load quality checks
//!
//! Statements run one at a time on a single session through a
//! [`DatabaseBackend`]: embedded DuckDB, PostgreSQL, or Redshift over the
//! PostgreSQL wire protocol.

pub mod calendar;
pub mod config;
pub mod database;
pub mod pipeline;
pub mod quality;
pub mod schema;
pub mod staging;
pub mod transform;

// Re-export commonly used types
pub use calendar::CalendarParts;
pub use config::{WarehouseBackendType, WarehouseConfig};
pub use database::{DatabaseBackend, DatabaseError, DatabaseResult, QueryResult, SqlDialect};
#[cfg(feature = "duckdb-backend")]
pub use database::DuckDBBackend;
#[cfg(feature = "postgres-backend")]
pub use database::PostgresBackend;
pub use pipeline::{Pipeline, PipelineError, PipelineReport};
pub use quality::{CheckOutcome, QualityChecker, QualityReport};
pub use schema::{SchemaManager, WarehouseTable};
pub use staging::{CopyStatement, IngestStats, StagingError, StagingLoader, StagingReport};
pub use transform::{Transform, TransformEngine, TransformReport};
