//! Post-load data quality checks
//!
//! Each check is one SQL query against the loaded warehouse. A failing
//! check is reported, not raised; only database errors abort the run.

use serde::{Deserialize, Serialize};

use crate::database::{DatabaseBackend, DatabaseResult};
use crate::schema::WarehouseTable;

/// Result of a single check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
    /// Offending row count, or the mismatch being compared
    pub detail: String,
}

impl CheckOutcome {
    fn zero_rows(name: &str, offending: i64) -> Self {
        Self {
            name: name.to_string(),
            passed: offending == 0,
            detail: format!("{} offending rows", offending),
        }
    }
}

/// All check outcomes from one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityReport {
    pub checks: Vec<CheckOutcome>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Runs warehouse assertions
pub struct QualityChecker<'a, B: DatabaseBackend + ?Sized> {
    backend: &'a B,
}

impl<'a, B: DatabaseBackend + ?Sized> QualityChecker<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    async fn count(&self, sql: &str) -> DatabaseResult<i64> {
        tracing::debug!(sql = %sql, "Running quality query");
        let result = self.backend.execute_query(sql).await?;
        Ok(result.scalar_i64().unwrap_or(0))
    }

    /// Rows sharing a key that must be unique
    async fn duplicate_keys(&self, table: WarehouseTable, key: &str) -> DatabaseResult<CheckOutcome> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM (SELECT {key} FROM {} GROUP BY {key} HAVING COUNT(*) > 1) dup",
            table.ident()
        );
        let offending = self.count(&sql).await?;
        Ok(CheckOutcome::zero_rows(
            &format!("unique {}.{}", table.name(), key),
            offending,
        ))
    }

    async fn time_fields_in_range(&self) -> DatabaseResult<CheckOutcome> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {} \
             WHERE hour NOT BETWEEN 0 AND 23 \
             OR day NOT BETWEEN 1 AND 31 \
             OR week NOT BETWEEN 1 AND 53 \
             OR month NOT BETWEEN 1 AND 12 \
             OR weekday NOT BETWEEN 0 AND 6",
            WarehouseTable::Time.ident()
        );
        let offending = self.count(&sql).await?;
        Ok(CheckOutcome::zero_rows("time fields in range", offending))
    }

    async fn time_covers_plays(&self) -> DatabaseResult<CheckOutcome> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM ( \
                SELECT DISTINCT ts FROM staging_events \
                WHERE page = 'NextSong' AND ts IS NOT NULL \
             ) plays \
             LEFT JOIN {} t ON t.start_time = plays.ts \
             WHERE t.start_time IS NULL",
            WarehouseTable::Time.ident()
        );
        let offending = self.count(&sql).await?;
        Ok(CheckOutcome::zero_rows("time row for every play", offending))
    }

    async fn songplays_match_events(&self) -> DatabaseResult<CheckOutcome> {
        let plays = self
            .count("SELECT COUNT(*) AS n FROM staging_events WHERE page = 'NextSong'")
            .await?;
        let facts = self.count("SELECT COUNT(*) AS n FROM songplays").await?;

        Ok(CheckOutcome {
            name: "songplays per NextSong event".to_string(),
            passed: plays == facts,
            detail: format!("{} songplays for {} NextSong events", facts, plays),
        })
    }

    /// Run every check
    pub async fn run_all(&self) -> DatabaseResult<QualityReport> {
        let checks = vec![
            self.duplicate_keys(WarehouseTable::Users, "user_id").await?,
            self.duplicate_keys(WarehouseTable::Artists, "artist_id").await?,
            self.duplicate_keys(WarehouseTable::Songs, "song_id").await?,
            self.duplicate_keys(WarehouseTable::Time, "start_time").await?,
            self.time_fields_in_range().await?,
            self.time_covers_plays().await?,
            self.songplays_match_events().await?,
        ];

        let report = QualityReport { checks };
        for failure in report.failures() {
            tracing::warn!(check = %failure.name, "Quality check failed: {}", failure.detail);
        }
        tracing::info!(
            "{} of {} quality checks passed",
            report.checks.iter().filter(|c| c.passed).count(),
            report.checks.len()
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rows_outcome() {
        assert!(CheckOutcome::zero_rows("x", 0).passed);
        let failed = CheckOutcome::zero_rows("x", 3);
        assert!(!failed.passed);
        assert_eq!(failed.detail, "3 offending rows");
    }

    #[test]
    fn test_report_failures() {
        let report = QualityReport {
            checks: vec![
                CheckOutcome::zero_rows("a", 0),
                CheckOutcome::zero_rows("b", 1),
            ],
        };
        assert!(!report.passed());
        let names: Vec<&str> = report.failures().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b"]);
        assert!(QualityReport::default().passed());
    }
}
