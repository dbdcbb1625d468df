//! Table definitions for the staging area and the star schema
//!
//! Column names, nullability and keys here are the contract downstream
//! consumers read against. Dialect differences are confined to type names,
//! the surrogate id, and Redshift's physical layout hints.

use serde::{Deserialize, Serialize};

use crate::database::SqlDialect;

/// Every table the pipeline owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseTable {
    StagingEvents,
    StagingSongs,
    SongPlays,
    Users,
    Songs,
    Artists,
    Time,
}

impl WarehouseTable {
    /// All tables in drop/create order
    pub const ALL: [WarehouseTable; 7] = [
        WarehouseTable::StagingEvents,
        WarehouseTable::StagingSongs,
        WarehouseTable::SongPlays,
        WarehouseTable::Users,
        WarehouseTable::Songs,
        WarehouseTable::Artists,
        WarehouseTable::Time,
    ];

    /// Staging tables, replaced on every load cycle
    pub const STAGING: [WarehouseTable; 2] =
        [WarehouseTable::StagingEvents, WarehouseTable::StagingSongs];

    /// Fact and dimension tables
    pub const WAREHOUSE: [WarehouseTable; 5] = [
        WarehouseTable::SongPlays,
        WarehouseTable::Users,
        WarehouseTable::Songs,
        WarehouseTable::Artists,
        WarehouseTable::Time,
    ];

    /// Unquoted table name
    pub fn name(&self) -> &'static str {
        match self {
            WarehouseTable::StagingEvents => "staging_events",
            WarehouseTable::StagingSongs => "staging_songs",
            WarehouseTable::SongPlays => "songplays",
            WarehouseTable::Users => "users",
            WarehouseTable::Songs => "songs",
            WarehouseTable::Artists => "artists",
            WarehouseTable::Time => "time",
        }
    }

    /// Identifier as it must appear in SQL text
    ///
    /// `time` is a type keyword in every supported dialect.
    pub fn ident(&self) -> &'static str {
        match self {
            WarehouseTable::Time => "\"time\"",
            other => other.name(),
        }
    }

    pub fn is_staging(&self) -> bool {
        matches!(
            self,
            WarehouseTable::StagingEvents | WarehouseTable::StagingSongs
        )
    }

    /// Column layout of this table
    pub fn definition(&self) -> TableDefinition {
        let (columns, primary_key, dist_style_all): (&'static [ColumnDefinition], _, _) =
            match self {
                WarehouseTable::StagingEvents => (STAGING_EVENTS, None, false),
                WarehouseTable::StagingSongs => (STAGING_SONGS, None, false),
                WarehouseTable::SongPlays => (SONGPLAYS, Some("songplay_id"), false),
                WarehouseTable::Users => (USERS, Some("user_id"), true),
                WarehouseTable::Songs => (SONGS, Some("song_id"), true),
                WarehouseTable::Artists => (ARTISTS, Some("artist_id"), true),
                WarehouseTable::Time => (TIME, Some("start_time"), true),
            };

        TableDefinition {
            table: *self,
            columns,
            primary_key,
            dist_style_all,
        }
    }
}

impl std::fmt::Display for WarehouseTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Semantic column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Varchar(u16),
    SmallInt,
    Integer,
    BigInt,
    /// Arbitrary-precision number in the source schema
    Numeric,
    Timestamp,
}

impl ColumnType {
    /// Type name in the given dialect
    pub fn render(&self, dialect: SqlDialect) -> String {
        match self {
            ColumnType::Text => "text".to_string(),
            ColumnType::Varchar(n) => format!("varchar({})", n),
            ColumnType::SmallInt => "smallint".to_string(),
            ColumnType::Integer => "integer".to_string(),
            ColumnType::BigInt => "bigint".to_string(),
            // DuckDB's bare NUMERIC is DECIMAL(18,3) and would round durations
            ColumnType::Numeric => match dialect {
                SqlDialect::DuckDb => "double".to_string(),
                SqlDialect::Redshift | SqlDialect::Postgres => "numeric".to_string(),
            },
            ColumnType::Timestamp => "timestamp".to_string(),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt
        )
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::Varchar(_))
    }
}

/// One column of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: &'static str,
    pub data_type: ColumnType,
    pub nullable: bool,
    /// Engine-generated monotonic surrogate
    pub identity: bool,
    pub sort_key: bool,
    pub dist_key: bool,
}

impl ColumnDefinition {
    pub const fn new(name: &'static str, data_type: ColumnType) -> Self {
        Self {
            name,
            data_type,
            nullable: true,
            identity: false,
            sort_key: false,
            dist_key: false,
        }
    }

    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub const fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    pub const fn sort_key(mut self) -> Self {
        self.sort_key = true;
        self
    }

    pub const fn dist_key(mut self) -> Self {
        self.dist_key = true;
        self
    }
}

use ColumnType::*;

const fn col(name: &'static str, data_type: ColumnType) -> ColumnDefinition {
    ColumnDefinition::new(name, data_type)
}

static STAGING_EVENTS: &[ColumnDefinition] = &[
    col("artist", Text),
    col("auth", Varchar(25)),
    col("firstName", Text),
    col("gender", Varchar(1)),
    col("itemInSession", Integer),
    col("lastName", Text),
    col("length", Numeric),
    col("level", Varchar(25)),
    col("location", Text),
    col("method", Varchar(10)),
    col("page", Varchar(25)).sort_key(),
    col("registration", Numeric),
    col("sessionId", Integer),
    col("song", Text),
    col("status", Integer),
    col("ts", Timestamp),
    col("userAgent", Text),
    col("userId", Integer),
];

static STAGING_SONGS: &[ColumnDefinition] = &[
    col("artist_id", Varchar(25)).sort_key(),
    col("artist_latitude", Numeric),
    col("artist_location", Text),
    col("artist_longitude", Numeric),
    col("artist_name", Text),
    col("duration", Numeric),
    col("num_songs", Integer),
    col("song_id", Text),
    col("title", Text),
    col("year", Integer),
];

static SONGPLAYS: &[ColumnDefinition] = &[
    col("songplay_id", BigInt).identity(),
    col("start_time", Timestamp).not_null().sort_key(),
    col("user_id", Integer).not_null().dist_key(),
    col("level", Varchar(15)).not_null(),
    col("song_id", Varchar(20)),
    col("artist_id", Varchar(20)),
    col("session_id", Integer).not_null(),
    col("location", Text),
    col("user_agent", Text).not_null(),
];

static USERS: &[ColumnDefinition] = &[
    col("user_id", Integer).not_null().sort_key(),
    col("first_name", Text).not_null(),
    col("last_name", Text).not_null(),
    col("gender", Varchar(10)).not_null(),
    col("level", Varchar(15)).not_null(),
];

static SONGS: &[ColumnDefinition] = &[
    col("song_id", Varchar(20)).not_null().sort_key(),
    col("title", Text).not_null(),
    col("artist_id", Text).not_null(),
    col("year", Integer).not_null(),
    col("duration", Numeric).not_null(),
];

static ARTISTS: &[ColumnDefinition] = &[
    col("artist_id", Varchar(20)).not_null().sort_key(),
    col("name", Text).not_null(),
    col("location", Text),
    col("latitude", Numeric),
    col("longitude", Numeric),
];

static TIME: &[ColumnDefinition] = &[
    col("start_time", Timestamp).not_null().sort_key(),
    col("hour", SmallInt).not_null(),
    col("day", SmallInt).not_null(),
    col("week", SmallInt).not_null(),
    col("month", SmallInt).not_null(),
    col("year", SmallInt).not_null(),
    col("weekday", SmallInt).not_null(),
];

/// Full layout of one table
#[derive(Debug, Clone, Copy)]
pub struct TableDefinition {
    pub table: WarehouseTable,
    pub columns: &'static [ColumnDefinition],
    pub primary_key: Option<&'static str>,
    /// Replicate the table to every node (Redshift `diststyle all`)
    pub dist_style_all: bool,
}

impl TableDefinition {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// Name of the sequence backing the identity column on DuckDB
    pub fn sequence_name(&self) -> Option<String> {
        self.columns
            .iter()
            .find(|c| c.identity)
            .map(|c| format!("{}_{}_seq", self.table.name(), c.name))
    }

    /// Statements that remove the table, tolerant of it not existing
    pub fn drop_statements(&self, dialect: SqlDialect) -> Vec<String> {
        let mut statements = vec![format!("DROP TABLE IF EXISTS {};", self.table.ident())];

        if dialect == SqlDialect::DuckDb
            && let Some(sequence) = self.sequence_name()
        {
            statements.push(format!("DROP SEQUENCE IF EXISTS {};", sequence));
        }

        statements
    }

    /// Statements that create the table (and its sequence on DuckDB)
    pub fn create_statements(&self, dialect: SqlDialect) -> Vec<String> {
        let mut statements = Vec::new();

        if dialect == SqlDialect::DuckDb
            && let Some(sequence) = self.sequence_name()
        {
            statements.push(format!("CREATE SEQUENCE {} START 1;", sequence));
        }

        statements.push(self.create_table_sql(dialect));
        statements
    }

    fn render_column(&self, column: &ColumnDefinition, dialect: SqlDialect) -> String {
        let mut sql = format!("    {} ", column.name);

        if column.identity {
            match dialect {
                SqlDialect::Redshift => sql.push_str("bigint identity(0, 1)"),
                SqlDialect::Postgres => sql.push_str("bigint generated by default as identity"),
                SqlDialect::DuckDb => {
                    let sequence = self.sequence_name().unwrap_or_default();
                    sql.push_str(&format!("bigint default nextval('{}')", sequence));
                }
            }
        } else {
            sql.push_str(&column.data_type.render(dialect));
        }

        if !column.nullable {
            sql.push_str(" not null");
        }

        if dialect == SqlDialect::Redshift {
            if column.sort_key {
                sql.push_str(" sortkey");
            }
            if column.dist_key {
                sql.push_str(" distkey");
            }
        }

        sql
    }

    fn create_table_sql(&self, dialect: SqlDialect) -> String {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| self.render_column(c, dialect))
            .collect();

        if let Some(pk) = self.primary_key {
            lines.push(format!("    PRIMARY KEY ({})", pk));
        }

        let mut sql = format!(
            "CREATE TABLE {} (\n{}\n)",
            self.table.ident(),
            lines.join(",\n")
        );

        if dialect == SqlDialect::Redshift && self.dist_style_all {
            sql.push_str("\ndiststyle all");
        }

        sql.push(';');
        sql
    }
}
