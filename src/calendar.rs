//! Calendar decomposition for the time dimension
//!
//! Convention, identical in SQL and in Rust:
//! - `hour` 0-23, `day` 1-31, `month` 1-12, `year`, all from the UTC timestamp
//! - `week` is the ISO-8601 week number (1-53)
//! - `weekday` counts days since Monday (Monday = 0, Sunday = 6)
//!
//! Redshift, PostgreSQL and DuckDB all number `dow` from Sunday = 0 and
//! `week` per ISO-8601, so the rendered expressions agree across engines.

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Calendar fields stored in the `time` dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarParts {
    pub hour: u32,
    pub day: u32,
    pub week: u32,
    pub month: u32,
    pub year: i32,
    pub weekday: u32,
}

impl CalendarParts {
    pub fn from_timestamp(ts: &NaiveDateTime) -> Self {
        Self {
            hour: ts.hour(),
            day: ts.day(),
            week: ts.iso_week().week(),
            month: ts.month(),
            year: ts.year(),
            weekday: ts.weekday().num_days_from_monday(),
        }
    }

    /// Decompose an epoch-milliseconds event timestamp
    pub fn from_epoch_millis(ms: i64) -> Option<Self> {
        chrono::DateTime::from_timestamp_millis(ms).map(|dt| Self::from_timestamp(&dt.naive_utc()))
    }

    /// Whether every field lies in its calendar range
    pub fn is_consistent(&self) -> bool {
        self.hour <= 23
            && (1..=31).contains(&self.day)
            && (1..=53).contains(&self.week)
            && (1..=12).contains(&self.month)
            && self.weekday <= 6
    }
}

/// SQL expression for each `time` column, in table order after `start_time`
///
/// `column` is the timestamp expression to decompose.
pub fn sql_expressions(column: &str) -> [(&'static str, String); 6] {
    [
        ("hour", format!("EXTRACT(hour FROM {})", column)),
        ("day", format!("EXTRACT(day FROM {})", column)),
        ("week", format!("EXTRACT(week FROM {})", column)),
        ("month", format!("EXTRACT(month FROM {})", column)),
        ("year", format!("EXTRACT(year FROM {})", column)),
        ("weekday", format!("(EXTRACT(dow FROM {}) + 6) % 7", column)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompose_known_event() {
        // 2018-11-01 20:57:10.796 UTC, a Thursday in ISO week 44
        let parts = CalendarParts::from_epoch_millis(1541105830796).unwrap();
        assert_eq!(
            parts,
            CalendarParts {
                hour: 20,
                day: 1,
                week: 44,
                month: 11,
                year: 2018,
                weekday: 3,
            }
        );
        assert!(parts.is_consistent());
    }

    #[test]
    fn test_week_boundaries_follow_iso() {
        // 2018-12-31 is a Monday in ISO week 1 of 2019
        let ts = chrono::NaiveDate::from_ymd_opt(2018, 12, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let parts = CalendarParts::from_timestamp(&ts);
        assert_eq!(parts.week, 1);
        assert_eq!(parts.weekday, 0);
        assert_eq!(parts.year, 2018);

        // 2018-11-04 is a Sunday
        let ts = chrono::NaiveDate::from_ymd_opt(2018, 11, 4)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        let parts = CalendarParts::from_timestamp(&ts);
        assert_eq!(parts.weekday, 6);
        assert_eq!(parts.hour, 23);
    }

    #[test]
    fn test_sql_expressions() {
        let exprs = sql_expressions("ts");
        let names: Vec<&str> = exprs.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["hour", "day", "week", "month", "year", "weekday"]);
        assert_eq!(exprs[5].1, "(EXTRACT(dow FROM ts) + 6) % 7");
    }

    #[test]
    fn test_inconsistent_parts() {
        let parts = CalendarParts {
            hour: 24,
            day: 1,
            week: 1,
            month: 1,
            year: 2018,
            weekday: 0,
        };
        assert!(!parts.is_consistent());
    }
}
