//! Bulk-load requests and their Redshift `COPY` rendering

use serde::{Deserialize, Serialize};

use crate::config::WarehouseConfig;
use crate::database::value::quote_literal;
use crate::schema::WarehouseTable;

/// How the loader maps JSON keys to columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JsonFormat {
    /// Match keys to column names
    Auto,
    /// Location of a JSONPaths document
    JsonPaths(String),
}

/// One whole-dataset load into a staging table
///
/// Rendered as a `COPY` on Redshift; executed by local ingestion elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyStatement {
    pub table: WarehouseTable,
    pub source_uri: String,
    pub iam_role_arn: String,
    pub region: String,
    pub format: JsonFormat,
    /// Timestamp fields arrive as epoch milliseconds
    pub epoch_millis: bool,
    /// Malformed records tolerated before the load aborts
    pub max_errors: u32,
}

impl CopyStatement {
    /// Event log load (`LOG_DATA` with the `LOG_JSONPATH` mapping)
    pub fn events(config: &WarehouseConfig) -> Self {
        let format = if config.s3.log_jsonpath.trim().is_empty() {
            JsonFormat::Auto
        } else {
            JsonFormat::JsonPaths(config.s3.log_jsonpath.clone())
        };

        Self {
            table: WarehouseTable::StagingEvents,
            source_uri: config.s3.log_data.clone(),
            iam_role_arn: config.iam_role.arn.clone(),
            region: config.s3.region.clone(),
            format,
            epoch_millis: true,
            max_errors: config.copy.max_errors,
        }
    }

    /// Song catalog load (`SONG_DATA`, auto mapping)
    pub fn songs(config: &WarehouseConfig) -> Self {
        Self {
            table: WarehouseTable::StagingSongs,
            source_uri: config.s3.song_data.clone(),
            iam_role_arn: config.iam_role.arn.clone(),
            region: config.s3.region.clone(),
            format: JsonFormat::Auto,
            epoch_millis: false,
            max_errors: config.copy.max_errors,
        }
    }

    pub fn to_sql(&self) -> String {
        let json = match &self.format {
            JsonFormat::Auto => "auto",
            JsonFormat::JsonPaths(uri) => uri.as_str(),
        };

        let mut sql = format!(
            "COPY {} FROM {}\nCREDENTIALS {}\nREGION {}\nJSON {}",
            self.table.ident(),
            quote_literal(&self.source_uri),
            quote_literal(&format!("aws_iam_role={}", self.iam_role_arn)),
            quote_literal(&self.region),
            quote_literal(json),
        );

        if self.epoch_millis {
            sql.push_str("\nTIMEFORMAT 'epochmillisecs'");
        }

        sql.push_str(&format!("\nMAXERROR {};", self.max_errors));
        sql
    }
}
