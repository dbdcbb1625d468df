//! Local file ingestion
//!
//! Reads JSON records from local files and turns them into typed rows for a
//! staging table. Used by every backend that can't `COPY` from object
//! storage itself.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::StagingError;
use crate::database::SqlValue;
use crate::database::value::TIMESTAMP_FORMAT;
use crate::schema::{ColumnDefinition, ColumnType};

/// Errors kept verbatim in [`IngestStats::errors`]
const MAX_RECORDED_ERRORS: usize = 100;

/// Statistics from one staging load
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    /// Number of files read
    pub files_processed: usize,
    /// Rows written to the staging table
    pub records_loaded: u64,
    /// Malformed records skipped
    pub records_rejected: usize,
    /// Total bytes read
    pub bytes_processed: u64,
    /// First rejection messages (limited to 100)
    pub errors: Vec<String>,
    /// Duration of the load
    #[serde(skip)]
    pub duration: Duration,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a rejected record, keeping its message if there is room
    pub fn reject(&mut self, error: String) {
        self.records_rejected += 1;
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push(error);
        }
    }

    /// Rows loaded per second
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.records_loaded as f64 / secs
        }
    }
}

/// A discovered file to ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Turn a source URI into a local path
///
/// Accepts plain paths and `file://` URIs. Any other scheme (`s3://`, ...)
/// needs an engine with native bulk-load.
pub fn resolve_local_source(uri: &str) -> Result<PathBuf, StagingError> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return Err(StagingError::UnsupportedSource(
            "empty source location".to_string(),
        ));
    }
    if let Some(path) = trimmed.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if trimmed.contains("://") {
        return Err(StagingError::UnsupportedSource(trimmed.to_string()));
    }
    Ok(PathBuf::from(trimmed))
}

/// Find every JSON file under a source location
///
/// A file is taken as-is, a directory is searched recursively for `*.json`,
/// and anything else is treated as a key prefix the way object storage does.
pub fn discover_files(source: &Path) -> Result<Vec<DiscoveredFile>, StagingError> {
    let mut files = Vec::new();

    if source.is_file() {
        push_file(&mut files, source.to_path_buf())?;
    } else if source.is_dir() {
        collect_json_under(&mut files, source)?;
    } else {
        let pattern = format!("{}*", glob::Pattern::escape(&source.display().to_string()));
        for entry in glob::glob(&pattern).map_err(|e| StagingError::InvalidPattern(e.to_string()))? {
            match entry {
                Ok(path) if path.is_dir() => collect_json_under(&mut files, &path)?,
                Ok(path) if path.is_file() => push_file(&mut files, path)?,
                Ok(_) => {}
                Err(e) => tracing::warn!("Error accessing path: {}", e),
            }
        }
    }

    // Sort by path for consistent ordering
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.dedup();

    Ok(files)
}

fn collect_json_under(files: &mut Vec<DiscoveredFile>, dir: &Path) -> Result<(), StagingError> {
    let pattern = format!("{}/**/*.json", glob::Pattern::escape(&dir.display().to_string()));
    for entry in glob::glob(&pattern).map_err(|e| StagingError::InvalidPattern(e.to_string()))? {
        match entry {
            Ok(path) if path.is_file() => push_file(files, path)?,
            Ok(_) => {}
            Err(e) => tracing::warn!("Error accessing path: {}", e),
        }
    }
    Ok(())
}

fn push_file(files: &mut Vec<DiscoveredFile>, path: PathBuf) -> Result<(), StagingError> {
    let metadata = fs::metadata(&path).map_err(|e| StagingError::io(&path, e))?;
    files.push(DiscoveredFile {
        size: metadata.len(),
        path,
    });
    Ok(())
}

/// One parsed (or unparseable) record of a file
#[derive(Debug)]
pub struct ParsedRecord {
    /// Record index within the file (0-based line number for line-delimited files)
    pub index: usize,
    pub value: Result<Value, String>,
}

/// Split file content into JSON records
///
/// A file holding a single JSON object is one record and a top-level array
/// yields its elements. Otherwise the content is read as newline-delimited
/// JSON and each non-blank line is a record on its own.
pub fn parse_records(content: &str) -> Vec<ParsedRecord> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(index, v)| ParsedRecord { index, value: Ok(v) })
            .collect(),
        Ok(value) => vec![ParsedRecord {
            index: 0,
            value: Ok(value),
        }],
        Err(_) => content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| ParsedRecord {
                index,
                value: serde_json::from_str(line.trim()).map_err(|e| e.to_string()),
            })
            .collect(),
    }
}

/// Convert one JSON value to the column's SQL type
///
/// `epoch_millis` makes timestamp columns read integers as milliseconds
/// since the Unix epoch.
pub fn coerce_value(
    value: Option<&Value>,
    column: &ColumnDefinition,
    epoch_millis: bool,
) -> Result<SqlValue, String> {
    let value = match value {
        None | Some(Value::Null) => return Ok(SqlValue::Null),
        Some(Value::String(s)) if s.trim().is_empty() && !column.data_type.is_textual() => {
            return Ok(SqlValue::Null);
        }
        Some(v) => v,
    };

    let mismatch = || format!("{}: cannot load {} as {:?}", column.name, value, column.data_type);

    match column.data_type {
        t if t.is_integer() => {
            let parsed = match value {
                Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral_to_i64)),
                Value::String(s) => parse_integer(s.trim()),
                _ => None,
            };
            parsed
                .and_then(|i| fit_integer(i, t))
                .map(SqlValue::Int)
                .ok_or_else(mismatch)
        }
        ColumnType::Numeric => match value {
            Value::Number(n) => n.as_f64().map(SqlValue::Float).ok_or_else(mismatch),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(SqlValue::Float)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ColumnType::Timestamp => {
            let parsed = match value {
                Value::Number(n) if epoch_millis => n
                    .as_i64()
                    .or_else(|| n.as_f64().and_then(|f| integral_to_i64(f.trunc())))
                    .and_then(from_epoch_millis),
                Value::String(s) => parse_integer(s.trim())
                    .filter(|_| epoch_millis)
                    .and_then(from_epoch_millis)
                    .or_else(|| NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT).ok()),
                _ => None,
            };
            parsed.map(SqlValue::Timestamp).ok_or_else(mismatch)
        }
        _ => match value {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Number(n) => Ok(SqlValue::Text(n.to_string())),
            Value::Bool(b) => Ok(SqlValue::Text(b.to_string())),
            other => Ok(SqlValue::Text(other.to_string())),
        },
    }
}

fn parse_integer(s: &str) -> Option<i64> {
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().and_then(integral_to_i64))
}

/// Whole float to i64; `None` for fractions, non-finite values and anything out of range
fn integral_to_i64(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Keep an integer only if the column's width can hold it
fn fit_integer(i: i64, data_type: ColumnType) -> Option<i64> {
    match data_type {
        ColumnType::SmallInt => i16::try_from(i).ok().map(i64::from),
        ColumnType::Integer => i32::try_from(i).ok().map(i64::from),
        _ => Some(i),
    }
}

fn from_epoch_millis(ms: i64) -> Option<NaiveDateTime> {
    chrono::DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn column(name: &'static str, data_type: ColumnType) -> ColumnDefinition {
        ColumnDefinition::new(name, data_type)
    }

    #[test]
    fn test_resolve_local_source() {
        assert_eq!(
            resolve_local_source("file:///data/log_data").unwrap(),
            PathBuf::from("/data/log_data")
        );
        assert_eq!(
            resolve_local_source("./data/song_data").unwrap(),
            PathBuf::from("./data/song_data")
        );
        assert!(matches!(
            resolve_local_source("s3://udacity-dend/log_data"),
            Err(StagingError::UnsupportedSource(_))
        ));
        assert!(resolve_local_source("  ").is_err());
    }

    #[test]
    fn test_discover_nested_song_files() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("song_data/A/B/C");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("TRABCEI128F424C983.json"), "{}").unwrap();
        fs::write(dir.path().join("song_data/A/TRAAAAW128F429D538.json"), "{}").unwrap();
        fs::write(dir.path().join("song_data/A/notes.txt"), "skip").unwrap();

        let files = discover_files(&dir.path().join("song_data")).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.path.extension().unwrap() == "json"));
        assert!(files[0].path < files[1].path);
    }

    #[test]
    fn test_discover_by_prefix() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("2018-11-01-events.json"), "{}").unwrap();
        fs::write(dir.path().join("2018-11-02-events.json"), "{}").unwrap();
        fs::write(dir.path().join("2018-12-01-events.json"), "{}").unwrap();

        let files = discover_files(&dir.path().join("2018-11-")).unwrap();
        assert_eq!(files.len(), 2);

        let single = discover_files(&dir.path().join("2018-12-01-events.json")).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].size, 2);
    }

    #[test]
    fn test_parse_records_ndjson_with_bad_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.json");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, r#"{{"userId": "7", "page": "NextSong"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"userId": "8", "page": "#).unwrap();
        writeln!(file, r#"{{"userId": "9", "page": "Home"}}"#).unwrap();

        let records = parse_records(&fs::read_to_string(&path).unwrap());
        assert_eq!(records.len(), 3);
        assert!(records[0].value.is_ok());
        assert_eq!(records[1].index, 2);
        assert!(records[1].value.is_err());
        assert_eq!(records[2].value.as_ref().unwrap()["page"], "Home");
    }

    #[test]
    fn test_parse_records_single_document() {
        let content = "{\n  \"song_id\": \"S1\",\n  \"title\": \"Foo\"\n}\n";
        let records = parse_records(content);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value.as_ref().unwrap()["song_id"], "S1");
    }

    #[test]
    fn test_coerce_integers() {
        let col = column("userId", ColumnType::Integer);
        assert_eq!(coerce_value(Some(&json!(7)), &col, false).unwrap(), SqlValue::Int(7));
        assert_eq!(coerce_value(Some(&json!("39")), &col, false).unwrap(), SqlValue::Int(39));
        assert_eq!(coerce_value(Some(&json!(12.0)), &col, false).unwrap(), SqlValue::Int(12));
        assert_eq!(coerce_value(Some(&json!("")), &col, false).unwrap(), SqlValue::Null);
        assert_eq!(coerce_value(None, &col, false).unwrap(), SqlValue::Null);
        assert!(coerce_value(Some(&json!("abc")), &col, false).is_err());
        assert!(coerce_value(Some(&json!(1.5)), &col, false).is_err());
    }

    #[test]
    fn test_coerce_integers_respect_column_width() {
        let user_id = column("userId", ColumnType::Integer);
        assert_eq!(
            coerce_value(Some(&json!(2147483647i64)), &user_id, false).unwrap(),
            SqlValue::Int(i32::MAX as i64)
        );
        assert!(coerce_value(Some(&json!(3000000000i64)), &user_id, false).is_err());
        assert!(coerce_value(Some(&json!("-3000000000")), &user_id, false).is_err());

        let hour = column("hour", ColumnType::SmallInt);
        assert!(coerce_value(Some(&json!(40000)), &hour, false).is_err());
        assert_eq!(
            coerce_value(Some(&json!(23)), &hour, false).unwrap(),
            SqlValue::Int(23)
        );

        let id = column("songplay_id", ColumnType::BigInt);
        assert_eq!(
            coerce_value(Some(&json!(3000000000i64)), &id, false).unwrap(),
            SqlValue::Int(3000000000)
        );
    }

    #[test]
    fn test_coerce_rejects_saturating_floats() {
        let id = column("songplay_id", ColumnType::BigInt);
        assert!(coerce_value(Some(&json!(1e20)), &id, false).is_err());
        assert!(coerce_value(Some(&json!("1e20")), &id, false).is_err());
        assert_eq!(
            coerce_value(Some(&json!(4096.0)), &id, false).unwrap(),
            SqlValue::Int(4096)
        );

        let ts = column("ts", ColumnType::Timestamp);
        assert!(coerce_value(Some(&json!(1e20)), &ts, true).is_err());
        assert!(coerce_value(Some(&json!(1541105830796.0)), &ts, true).is_ok());
    }

    #[test]
    fn test_coerce_numeric_and_text() {
        let length = column("length", ColumnType::Numeric);
        assert_eq!(
            coerce_value(Some(&json!(218.93179)), &length, false).unwrap(),
            SqlValue::Float(218.93179)
        );
        assert_eq!(
            coerce_value(Some(&json!("200")), &length, false).unwrap(),
            SqlValue::Float(200.0)
        );

        let title = column("title", ColumnType::Text);
        assert_eq!(
            coerce_value(Some(&json!("")), &title, false).unwrap(),
            SqlValue::Text(String::new())
        );
        assert_eq!(
            coerce_value(Some(&json!(1999)), &title, false).unwrap(),
            SqlValue::Text("1999".to_string())
        );
    }

    #[test]
    fn test_coerce_epoch_millis() {
        let ts = column("ts", ColumnType::Timestamp);
        let expected = chrono::NaiveDate::from_ymd_opt(2018, 11, 1)
            .unwrap()
            .and_hms_milli_opt(20, 57, 10, 796)
            .unwrap();

        assert_eq!(
            coerce_value(Some(&json!(1541105830796i64)), &ts, true).unwrap(),
            SqlValue::Timestamp(expected)
        );
        assert_eq!(
            coerce_value(Some(&json!("1541105830796")), &ts, true).unwrap(),
            SqlValue::Timestamp(expected)
        );
        assert_eq!(
            coerce_value(Some(&json!("2018-11-01 20:57:10.796")), &ts, false).unwrap(),
            SqlValue::Timestamp(expected)
        );
        assert!(coerce_value(Some(&json!(true)), &ts, true).is_err());
    }

    #[test]
    fn test_stats_keep_first_errors() {
        let mut stats = IngestStats::new();
        for i in 0..150 {
            stats.reject(format!("bad record {}", i));
        }
        assert_eq!(stats.records_rejected, 150);
        assert_eq!(stats.errors.len(), MAX_RECORDED_ERRORS);

        stats.records_loaded = 1000;
        stats.duration = Duration::from_secs(10);
        assert_eq!(stats.throughput(), 100.0);
    }
}
