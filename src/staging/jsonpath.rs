//! JSONPaths field mapping
//!
//! A JSONPaths document lists one expression per target column, in column
//! order:
//!
//! ```json
//! {"jsonpaths": ["$['artist']", "$.auth", "$['firstName']"]}
//! ```
//!
//! Supported expression syntax: the root `$`, dot members (`.name`), quoted
//! bracket members (`['name']`, `["name"]`) and array indices (`[0]`).

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::error::StagingError;
use crate::schema::ColumnDefinition;

static FULL_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\$(?:\.[A-Za-z_][A-Za-z0-9_]*|\['[^']*'\]|\["[^"]*"\]|\[\d+\])*$"#)
        .expect("valid JSONPath regex")
});

static SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\.([A-Za-z_][A-Za-z0-9_]*)|\['([^']*)'\]|\["([^"]*)"\]|\[(\d+)\]"#)
        .expect("valid JSONPath segment regex")
});

/// One step of a JSONPath
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed JSONPath expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    expr: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn parse(expr: &str) -> Result<Self, StagingError> {
        let trimmed = expr.trim();
        if !FULL_PATH.is_match(trimmed) {
            return Err(StagingError::InvalidJsonPath {
                expr: expr.to_string(),
                reason: "expected $ followed by .name, ['name'] or [index] segments".to_string(),
            });
        }

        let mut segments = Vec::new();
        for caps in SEGMENT.captures_iter(trimmed) {
            if let Some(key) = caps.get(1).or(caps.get(2)).or(caps.get(3)) {
                segments.push(Segment::Key(key.as_str().to_string()));
            } else if let Some(index) = caps.get(4) {
                let index = index
                    .as_str()
                    .parse()
                    .map_err(|e| StagingError::InvalidJsonPath {
                        expr: expr.to_string(),
                        reason: format!("bad array index: {}", e),
                    })?;
                segments.push(Segment::Index(index));
            }
        }

        Ok(Self {
            expr: trimmed.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.expr
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Resolve the path against a record; missing members yield `None`
    pub fn select<'v>(&self, record: &'v Value) -> Option<&'v Value> {
        self.segments
            .iter()
            .try_fold(record, |current, segment| match segment {
                Segment::Key(key) => current.get(key.as_str()),
                Segment::Index(i) => current.get(*i),
            })
    }
}

#[derive(Debug, Deserialize)]
struct JsonPathsDocument {
    jsonpaths: Vec<String>,
}

/// An ordered list of JSONPath expressions, one per target column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPaths {
    paths: Vec<JsonPath>,
}

impl JsonPaths {
    /// Parse a `{"jsonpaths": [...]}` document
    pub fn parse(content: &str) -> Result<Self, StagingError> {
        let document: JsonPathsDocument =
            serde_json::from_str(content).map_err(|e| StagingError::InvalidJsonPath {
                expr: "<document>".to_string(),
                reason: e.to_string(),
            })?;

        let paths = document
            .jsonpaths
            .iter()
            .map(|p| JsonPath::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { paths })
    }

    /// Read and parse a JSONPaths document from disk
    pub fn load(path: &Path) -> Result<Self, StagingError> {
        let content = std::fs::read_to_string(path).map_err(|e| StagingError::io(path, e))?;
        Self::parse(&content)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[JsonPath] {
        &self.paths
    }
}

/// How JSON fields are matched to staging columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMapping {
    /// Key equal to the column name, falling back to an ASCII case-insensitive match
    Auto,
    /// The i-th path feeds the i-th column
    Paths(JsonPaths),
}

impl FieldMapping {
    /// Check the mapping can feed a table with these columns
    pub fn check_arity(&self, table: &str, columns: &[ColumnDefinition]) -> Result<(), StagingError> {
        match self {
            FieldMapping::Paths(paths) if paths.len() != columns.len() => {
                Err(StagingError::JsonPathArity {
                    table: table.to_string(),
                    expected: columns.len(),
                    found: paths.len(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Pick each column's source value out of a record
    pub fn extract<'v>(
        &self,
        record: &'v Value,
        columns: &[ColumnDefinition],
    ) -> Vec<Option<&'v Value>> {
        match self {
            FieldMapping::Auto => columns
                .iter()
                .map(|c| auto_lookup(record, c.name))
                .collect(),
            FieldMapping::Paths(paths) => paths.paths.iter().map(|p| p.select(record)).collect(),
        }
    }
}

fn auto_lookup<'v>(record: &'v Value, name: &str) -> Option<&'v Value> {
    let object = record.as_object()?;
    object.get(name).or_else(|| {
        object
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;
    use serde_json::json;

    #[test]
    fn test_parse_bracket_and_dot() {
        let path = JsonPath::parse("$['artist']").unwrap();
        assert_eq!(path.segments(), &[Segment::Key("artist".to_string())]);

        let path = JsonPath::parse("$.location.city[0]").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("location".to_string()),
                Segment::Key("city".to_string()),
                Segment::Index(0)
            ]
        );

        let path = JsonPath::parse(r#"$["user agent"]"#).unwrap();
        assert_eq!(path.segments(), &[Segment::Key("user agent".to_string())]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(JsonPath::parse("artist").is_err());
        assert!(JsonPath::parse("$..artist").is_err());
        assert!(JsonPath::parse("$[*]").is_err());
    }

    #[test]
    fn test_select() {
        let record = json!({"artist": "Bar", "tags": ["a", "b"], "geo": {"lat": 1.5}});
        assert_eq!(
            JsonPath::parse("$['artist']").unwrap().select(&record),
            Some(&json!("Bar"))
        );
        assert_eq!(
            JsonPath::parse("$.tags[1]").unwrap().select(&record),
            Some(&json!("b"))
        );
        assert_eq!(
            JsonPath::parse("$.geo.lat").unwrap().select(&record),
            Some(&json!(1.5))
        );
        assert_eq!(JsonPath::parse("$.missing").unwrap().select(&record), None);
        assert_eq!(JsonPath::parse("$").unwrap().select(&record), Some(&record));
    }

    #[test]
    fn test_parse_document() {
        let paths = JsonPaths::parse(r#"{"jsonpaths": ["$['artist']", "$.auth"]}"#).unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths.paths()[1].as_str(), "$.auth");

        assert!(JsonPaths::parse(r#"{"paths": []}"#).is_err());
    }

    #[test]
    fn test_auto_mapping_is_case_insensitive() {
        let columns = [
            ColumnDefinition::new("userId", ColumnType::Integer),
            ColumnDefinition::new("firstname", ColumnType::Text),
            ColumnDefinition::new("song", ColumnType::Text),
        ];
        let record = json!({"userId": 7, "firstName": "Ana"});

        let values = FieldMapping::Auto.extract(&record, &columns);
        assert_eq!(values, vec![Some(&json!(7)), Some(&json!("Ana")), None]);
    }

    #[test]
    fn test_arity_check() {
        let columns = [ColumnDefinition::new("a", ColumnType::Text)];
        let mapping = FieldMapping::Paths(
            JsonPaths::parse(r#"{"jsonpaths": ["$.a", "$.b"]}"#).unwrap(),
        );
        assert!(matches!(
            mapping.check_arity("t", &columns),
            Err(StagingError::JsonPathArity {
                expected: 1,
                found: 2,
                ..
            })
        ));
        assert!(FieldMapping::Auto.check_arity("t", &columns).is_ok());
    }
}
