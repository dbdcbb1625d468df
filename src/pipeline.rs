//! End-to-end pipeline orchestration
//!
//! Two jobs make up a load cycle: rebuilding the schema, then loading
//! staging and transforming into the star schema. Each stage runs only after
//! the previous one finished; the first failure stops the run.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::WarehouseConfig;
use crate::database::{DatabaseBackend, DatabaseError};
use crate::schema::SchemaManager;
use crate::staging::{StagingError, StagingLoader, StagingReport};
use crate::transform::{TransformEngine, TransformReport};

/// Errors from a pipeline run, tagged with the stage that failed
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration was rejected before anything ran
    #[error("Invalid configuration: {0}")]
    Config(DatabaseError),

    /// Dropping or creating tables failed
    #[error("Schema stage failed: {0}")]
    Schema(DatabaseError),

    /// A staging load failed
    #[error("Staging stage failed: {0}")]
    Staging(#[from] StagingError),

    /// A transform statement failed
    #[error("Transform stage failed: {0}")]
    Transform(DatabaseError),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Outcome of one pipeline run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Set when the run rebuilt the schema
    pub schema_ms: Option<u64>,
    pub staging_ms: u64,
    pub transform_ms: u64,
    pub staging: StagingReport,
    pub transform: TransformReport,
}

impl PipelineReport {
    pub fn total_ms(&self) -> u64 {
        self.schema_ms.unwrap_or(0) + self.staging_ms + self.transform_ms
    }
}

/// Runs schema, staging and transform stages against one backend
pub struct Pipeline<'a, B: DatabaseBackend + ?Sized> {
    config: &'a WarehouseConfig,
    backend: &'a B,
}

impl<'a, B: DatabaseBackend + ?Sized> Pipeline<'a, B> {
    /// Create a pipeline, validating the configuration first
    pub fn new(config: &'a WarehouseConfig, backend: &'a B) -> PipelineResult<Self> {
        config.validate().map_err(PipelineError::Config)?;

        if config.dialect() != backend.dialect() {
            tracing::warn!(
                "Configured backend {} differs from session dialect {}",
                config.database.backend,
                backend.dialect()
            );
        }

        Ok(Self { config, backend })
    }

    pub fn config(&self) -> &WarehouseConfig {
        self.config
    }

    /// Drop and recreate every table
    pub async fn create_tables(&self) -> PipelineResult<()> {
        SchemaManager::new(self.backend)
            .reset()
            .await
            .map_err(PipelineError::Schema)
    }

    /// Load events, then songs, into staging
    pub async fn load_staging(&self) -> PipelineResult<StagingReport> {
        Ok(StagingLoader::new(self.backend, self.config)
            .load_all()
            .await?)
    }

    /// Populate the fact and dimension tables from staging
    pub async fn transform(&self) -> PipelineResult<TransformReport> {
        TransformEngine::new(self.backend)
            .run_all()
            .await
            .map_err(PipelineError::Transform)
    }

    /// Load staging then transform, against an existing schema
    pub async fn run(&self) -> PipelineResult<PipelineReport> {
        self.execute(false).await
    }

    /// Rebuild the schema, then load staging and transform
    pub async fn run_full(&self) -> PipelineResult<PipelineReport> {
        self.execute(true).await
    }

    async fn execute(&self, rebuild_schema: bool) -> PipelineResult<PipelineReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("pipeline", run_id = %run_id);

        async move {
            let started_at = Utc::now();
            tracing::info!(backend = self.backend.backend_type(), "Pipeline run started");

            let schema_ms = if rebuild_schema {
                let start = Instant::now();
                self.create_tables().await?;
                Some(elapsed_ms(start))
            } else {
                None
            };

            let start = Instant::now();
            let staging = self.load_staging().await?;
            let staging_ms = elapsed_ms(start);

            let start = Instant::now();
            let transform = self.transform().await?;
            let transform_ms = elapsed_ms(start);

            let report = PipelineReport {
                run_id,
                started_at,
                schema_ms,
                staging_ms,
                transform_ms,
                staging,
                transform,
            };

            tracing::info!(
                "Pipeline run finished in {} ms, {} warehouse rows written",
                report.total_ms(),
                report.transform.total_rows()
            );
            Ok::<_, PipelineError>(report)
        }
        .instrument(span)
        .await
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
