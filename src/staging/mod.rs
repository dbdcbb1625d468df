//! Staging loader
//!
//! Bulk-loads the event log and the song catalog into the two staging
//! tables. Each load replaces the whole dataset and assumes the table was
//! just recreated.
//!
//! Redshift pulls the sources itself through `COPY`. Every other backend
//! goes through local ingestion: files are discovered on disk, parsed with
//! `serde_json`, coerced to the staging column types and inserted in
//! batches inside one transaction.

pub mod copy;
pub mod error;
pub mod ingest;
pub mod jsonpath;

pub use copy::{CopyStatement, JsonFormat};
pub use error::StagingError;
pub use ingest::{DiscoveredFile, IngestStats};
pub use jsonpath::{FieldMapping, JsonPath, JsonPaths};

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::config::WarehouseConfig;
use crate::database::{DatabaseBackend, SqlValue};
use crate::schema::ColumnDefinition;
use ingest::{coerce_value, discover_files, parse_records, resolve_local_source};

/// Result type for staging operations
pub type StagingResult<T> = Result<T, StagingError>;

/// Statistics for both staging loads
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingReport {
    pub events: IngestStats,
    pub songs: IngestStats,
}

/// Loads staging tables through a backend
pub struct StagingLoader<'a, B: DatabaseBackend + ?Sized> {
    backend: &'a B,
    config: &'a WarehouseConfig,
}

impl<'a, B: DatabaseBackend + ?Sized> StagingLoader<'a, B> {
    pub fn new(backend: &'a B, config: &'a WarehouseConfig) -> Self {
        Self { backend, config }
    }

    /// Load the event log into `staging_events`
    pub async fn load_events(&self) -> StagingResult<IngestStats> {
        self.load(&CopyStatement::events(self.config)).await
    }

    /// Load the song catalog into `staging_songs`
    pub async fn load_songs(&self) -> StagingResult<IngestStats> {
        self.load(&CopyStatement::songs(self.config)).await
    }

    /// Load events, then songs
    pub async fn load_all(&self) -> StagingResult<StagingReport> {
        let events = self.load_events().await?;
        let songs = self.load_songs().await?;
        Ok(StagingReport { events, songs })
    }

    /// Run one bulk-load
    pub async fn load(&self, copy: &CopyStatement) -> StagingResult<IngestStats> {
        let start = Instant::now();

        let mut stats = if self.backend.dialect().supports_native_copy() {
            self.copy_native(copy).await?
        } else {
            self.ingest_local(copy).await?
        };
        stats.duration = start.elapsed();

        tracing::info!(
            table = %copy.table,
            "Loaded {} records from {} files ({} rejected) in {} ms",
            stats.records_loaded,
            stats.files_processed,
            stats.records_rejected,
            stats.duration.as_millis()
        );

        Ok(stats)
    }

    async fn copy_native(&self, copy: &CopyStatement) -> StagingResult<IngestStats> {
        let sql = copy.to_sql();
        tracing::debug!(sql = %sql, "Executing COPY");

        let loaded = self.backend.execute(&sql).await.map_err(|e| {
            tracing::error!(table = %copy.table, "COPY failed: {}", e);
            e
        })?;

        Ok(IngestStats {
            records_loaded: loaded,
            ..IngestStats::new()
        })
    }

    async fn ingest_local(&self, copy: &CopyStatement) -> StagingResult<IngestStats> {
        let definition = copy.table.definition();
        let columns = definition.columns;

        let mapping = self.field_mapping(&copy.format)?;
        mapping.check_arity(copy.table.name(), columns)?;

        let source = resolve_local_source(&copy.source_uri)?;
        let files = discover_files(&source)?;
        if files.is_empty() {
            tracing::warn!(table = %copy.table, "No source files found at {}", source.display());
        }

        let mut stats = IngestStats::new();
        let mut rows: Vec<Vec<SqlValue>> = Vec::new();

        for file in &files {
            let content = tokio::fs::read_to_string(&file.path)
                .await
                .map_err(|e| StagingError::io(&file.path, e))?;
            stats.files_processed += 1;
            stats.bytes_processed += file.size;

            for record in parse_records(&content) {
                let row = record
                    .value
                    .and_then(|value| record_to_row(&mapping, &value, columns, copy.epoch_millis));
                match row {
                    Ok(row) => rows.push(row),
                    Err(reason) => {
                        let message = format!(
                            "{} record {}: {}",
                            file.path.display(),
                            record.index + 1,
                            reason
                        );
                        tracing::warn!(table = %copy.table, "Skipping malformed record: {}", message);
                        stats.reject(message);
                    }
                }
            }
        }

        // Nothing is written once the tolerance is exceeded
        if stats.records_rejected > copy.max_errors as usize {
            tracing::error!(
                table = %copy.table,
                "{} malformed records exceed max_errors = {}",
                stats.records_rejected,
                copy.max_errors
            );
            return Err(StagingError::ErrorThresholdExceeded {
                table: copy.table.name().to_string(),
                rejected: stats.records_rejected,
                max_errors: copy.max_errors,
            });
        }

        // One transaction: a rejected insert leaves the staging table empty
        let column_names = definition.column_names();
        stats.records_loaded = self
            .backend
            .insert_rows(
                copy.table.ident(),
                &column_names,
                &rows,
                self.config.copy.batch_size,
            )
            .await
            .map_err(|e| {
                tracing::error!(table = %copy.table, "Staging insert rolled back: {}", e);
                e
            })?;

        Ok(stats)
    }

    /// Resolve the mapping for local ingestion
    ///
    /// A JSONPaths location that isn't a readable local file (an `s3://` URI
    /// in a config shared with Redshift, say) degrades to auto mapping.
    fn field_mapping(&self, format: &JsonFormat) -> StagingResult<FieldMapping> {
        let JsonFormat::JsonPaths(location) = format else {
            return Ok(FieldMapping::Auto);
        };

        match resolve_local_source(location) {
            Ok(path) if path.is_file() => Ok(FieldMapping::Paths(JsonPaths::load(&path)?)),
            _ => {
                tracing::warn!(
                    "JSONPaths document {} is not a local file, falling back to auto mapping",
                    location
                );
                Ok(FieldMapping::Auto)
            }
        }
    }
}

fn record_to_row(
    mapping: &FieldMapping,
    record: &Value,
    columns: &[ColumnDefinition],
    epoch_millis: bool,
) -> Result<Vec<SqlValue>, String> {
    if !record.is_object() {
        return Err(format!("expected a JSON object, found {}", record));
    }

    mapping
        .extract(record, columns)
        .into_iter()
        .zip(columns)
        .map(|(value, column)| coerce_value(value, column, epoch_millis))
        .collect()
}
