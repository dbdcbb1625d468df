//! Transform engine
//!
//! Populates the fact and dimension tables from staging with five
//! `INSERT ... SELECT` statements, run in a fixed order on one session.
//! Running before staging is loaded leaves the targets empty or partial;
//! that isn't an error.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::calendar;
use crate::database::{DatabaseBackend, DatabaseResult};
use crate::schema::WarehouseTable;

/// One warehouse transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    SongPlays,
    Users,
    Songs,
    Artists,
    Time,
}

impl Transform {
    /// Execution order
    pub const ALL: [Transform; 5] = [
        Transform::SongPlays,
        Transform::Users,
        Transform::Songs,
        Transform::Artists,
        Transform::Time,
    ];

    /// Table the statement writes to
    pub fn target(&self) -> WarehouseTable {
        match self {
            Transform::SongPlays => WarehouseTable::SongPlays,
            Transform::Users => WarehouseTable::Users,
            Transform::Songs => WarehouseTable::Songs,
            Transform::Artists => WarehouseTable::Artists,
            Transform::Time => WarehouseTable::Time,
        }
    }

    /// The `INSERT ... SELECT` text
    ///
    /// Identical for every supported dialect.
    pub fn insert_sql(&self) -> String {
        match self {
            Transform::SongPlays => SONGPLAYS_INSERT.to_string(),
            Transform::Users => USERS_INSERT.to_string(),
            Transform::Songs => SONGS_INSERT.to_string(),
            Transform::Artists => ARTISTS_INSERT.to_string(),
            Transform::Time => time_insert(),
        }
    }
}

impl std::fmt::Display for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.target().name())
    }
}

// One fact row per NextSong event; unmatched plays keep NULL song/artist ids
const SONGPLAYS_INSERT: &str = "\
INSERT INTO songplays (start_time, user_id, level, song_id, artist_id, session_id, location, user_agent)
SELECT se.ts, se.userId, se.level, ss.song_id, ss.artist_id, se.sessionId, se.location, se.userAgent
FROM staging_events se
LEFT JOIN staging_songs ss
    ON se.song = ss.title
    AND se.artist = ss.artist_name
    AND se.length = ss.duration
WHERE se.page = 'NextSong';";

// Latest event per user wins, so a free -> paid upgrade lands as paid.
// Postgres and Redshift put NULLs first under DESC unless told otherwise.
const USERS_INSERT: &str = "\
INSERT INTO users (user_id, first_name, last_name, gender, level)
SELECT userId, firstName, lastName, gender, level
FROM (
    SELECT userId, firstName, lastName, gender, level,
           ROW_NUMBER() OVER (PARTITION BY userId ORDER BY ts DESC NULLS LAST) AS rn
    FROM staging_events
    WHERE userId IS NOT NULL
) ranked
WHERE rn = 1;";

const SONGS_INSERT: &str = "\
INSERT INTO songs (song_id, title, artist_id, year, duration)
SELECT DISTINCT song_id, title, artist_id, year, duration
FROM staging_songs;";

// Row from the artist's most recent song; song_id breaks year ties
const ARTISTS_INSERT: &str = "\
INSERT INTO artists (artist_id, name, location, latitude, longitude)
SELECT artist_id, artist_name, artist_location, artist_latitude, artist_longitude
FROM (
    SELECT artist_id, artist_name, artist_location, artist_latitude, artist_longitude,
           ROW_NUMBER() OVER (PARTITION BY artist_id ORDER BY year DESC NULLS LAST, song_id) AS rn
    FROM staging_songs
    WHERE artist_id IS NOT NULL
) ranked
WHERE rn = 1;";

fn time_insert() -> String {
    let expressions = calendar::sql_expressions("ts");
    let columns: Vec<&str> = expressions.iter().map(|(name, _)| *name).collect();
    let select: Vec<String> = expressions
        .iter()
        .map(|(name, expr)| format!("       {} AS {}", expr, name))
        .collect();

    format!(
        "INSERT INTO {} (start_time, {})\n\
         SELECT ts AS start_time,\n{}\n\
         FROM (\n    SELECT DISTINCT ts\n    FROM staging_events\n    WHERE page = 'NextSong'\n) plays;",
        WarehouseTable::Time.ident(),
        columns.join(", "),
        select.join(",\n")
    )
}

/// Rows written by one statement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformCount {
    pub transform: Transform,
    pub rows: u64,
    pub elapsed_ms: u64,
}

/// Per-statement results of a transform run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformReport {
    pub statements: Vec<TransformCount>,
}

impl TransformReport {
    /// Rows written by a transform, if it ran
    pub fn rows(&self, transform: Transform) -> Option<u64> {
        self.statements
            .iter()
            .find(|c| c.transform == transform)
            .map(|c| c.rows)
    }

    pub fn total_rows(&self) -> u64 {
        self.statements.iter().map(|c| c.rows).sum()
    }
}

/// Runs warehouse transformations against a backend
pub struct TransformEngine<'a, B: DatabaseBackend + ?Sized> {
    backend: &'a B,
}

impl<'a, B: DatabaseBackend + ?Sized> TransformEngine<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Run one transformation
    ///
    /// # Returns
    /// Rows inserted into the target table
    pub async fn run(&self, transform: Transform) -> DatabaseResult<u64> {
        let sql = transform.insert_sql();
        tracing::debug!(sql = %sql, "Executing transform");

        let start = Instant::now();
        let rows = self.backend.execute(&sql).await.map_err(|e| {
            tracing::error!(transform = %transform, "Transform failed: {}", e);
            e
        })?;

        tracing::info!(
            transform = %transform,
            "Inserted {} rows in {} ms",
            rows,
            start.elapsed().as_millis()
        );
        Ok(rows)
    }

    /// Run all five transformations in order, stopping at the first failure
    pub async fn run_all(&self) -> DatabaseResult<TransformReport> {
        let mut report = TransformReport::default();

        for transform in Transform::ALL {
            let start = Instant::now();
            let rows = self.run(transform).await?;
            report.statements.push(TransformCount {
                transform,
                rows,
                elapsed_ms: start.elapsed().as_millis() as u64,
            });
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_and_targets() {
        let targets: Vec<&str> = Transform::ALL.iter().map(|t| t.target().name()).collect();
        assert_eq!(targets, vec!["songplays", "users", "songs", "artists", "time"]);
    }

    #[test]
    fn test_songplays_only_next_song() {
        let sql = Transform::SongPlays.insert_sql();
        assert!(sql.starts_with("INSERT INTO songplays ("));
        assert!(!sql.contains("songplay_id"));
        assert!(sql.contains("LEFT JOIN staging_songs ss"));
        assert!(sql.contains("AND se.length = ss.duration"));
        assert!(sql.ends_with("WHERE se.page = 'NextSong';"));
    }

    #[test]
    fn test_dimension_dedup() {
        let users = Transform::Users.insert_sql();
        assert!(users.contains("PARTITION BY userId ORDER BY ts DESC NULLS LAST)"));
        assert!(users.contains("WHERE rn = 1"));

        let artists = Transform::Artists.insert_sql();
        assert!(artists.contains("ORDER BY year DESC NULLS LAST, song_id)"));
        assert!(artists.contains("WHERE artist_id IS NOT NULL"));

        assert!(Transform::Songs.insert_sql().contains("SELECT DISTINCT"));
    }

    #[test]
    fn test_time_insert() {
        let sql = Transform::Time.insert_sql();
        assert!(sql.starts_with(
            "INSERT INTO \"time\" (start_time, hour, day, week, month, year, weekday)"
        ));
        assert!(sql.contains("EXTRACT(week FROM ts) AS week"));
        assert!(sql.contains("(EXTRACT(dow FROM ts) + 6) % 7 AS weekday"));
        assert!(sql.contains("SELECT DISTINCT ts"));
        assert!(sql.contains("WHERE page = 'NextSong'"));
    }

    #[test]
    fn test_report_lookup() {
        let report = TransformReport {
            statements: vec![
                TransformCount {
                    transform: Transform::SongPlays,
                    rows: 4,
                    elapsed_ms: 1,
                },
                TransformCount {
                    transform: Transform::Users,
                    rows: 2,
                    elapsed_ms: 1,
                },
            ],
        };
        assert_eq!(report.rows(Transform::Users), Some(2));
        assert_eq!(report.rows(Transform::Time), None);
        assert_eq!(report.total_rows(), 6);
    }
}
