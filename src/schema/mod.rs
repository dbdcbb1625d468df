//! Schema management for the staging and star-schema tables
//!
//! Issues idempotent drop/create DDL for all seven tables. Database errors
//! (privileges, name collisions) propagate unchanged; nothing is retried.

mod tables;

pub use tables::{ColumnDefinition, ColumnType, TableDefinition, WarehouseTable};

use crate::database::{DatabaseBackend, DatabaseResult, SqlDialect};

/// `DROP TABLE IF EXISTS` statements for every table, in drop order
pub fn drop_statements(dialect: SqlDialect) -> Vec<String> {
    WarehouseTable::ALL
        .iter()
        .flat_map(|t| t.definition().drop_statements(dialect))
        .collect()
}

/// `CREATE TABLE` statements for every table, staging tables first
pub fn create_statements(dialect: SqlDialect) -> Vec<String> {
    WarehouseTable::ALL
        .iter()
        .flat_map(|t| t.definition().create_statements(dialect))
        .collect()
}

/// Issues schema DDL against a backend
pub struct SchemaManager<'a, B: DatabaseBackend + ?Sized> {
    backend: &'a B,
}

impl<'a, B: DatabaseBackend + ?Sized> SchemaManager<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    fn dialect(&self) -> SqlDialect {
        self.backend.dialect()
    }

    async fn run_statements(&self, statements: &[String]) -> DatabaseResult<()> {
        for sql in statements {
            tracing::debug!(sql = %sql, "Executing DDL");
            if let Err(e) = self.backend.execute(sql).await {
                tracing::error!("DDL failed: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drop all seven tables; a missing table is not an error
    pub async fn drop_all(&self) -> DatabaseResult<()> {
        self.run_statements(&drop_statements(self.dialect())).await?;
        tracing::info!("Dropped {} tables", WarehouseTable::ALL.len());
        Ok(())
    }

    /// Create all seven tables
    ///
    /// Fails if any table already exists; call [`SchemaManager::reset`] for a
    /// clean slate.
    pub async fn create_all(&self) -> DatabaseResult<()> {
        self.run_statements(&create_statements(self.dialect()))
            .await?;
        tracing::info!("Created {} tables", WarehouseTable::ALL.len());
        Ok(())
    }

    /// Drop then create every table, leaving an empty schema
    pub async fn reset(&self) -> DatabaseResult<()> {
        self.drop_all().await?;
        self.create_all().await
    }

    /// Delete every row from the fact and dimension tables
    ///
    /// Staging tables are left alone. The songplay id sequence is not reset.
    ///
    /// # Returns
    /// Total rows removed
    pub async fn truncate_warehouse(&self) -> DatabaseResult<u64> {
        let mut removed = 0;
        for table in WarehouseTable::WAREHOUSE {
            let sql = format!("DELETE FROM {};", table.ident());
            tracing::debug!(sql = %sql, "Clearing warehouse table");
            removed += self.backend.execute(&sql).await?;
        }
        tracing::info!("Removed {} warehouse rows", removed);
        Ok(removed)
    }

    /// Pipeline tables that currently exist, in drop/create order
    pub async fn existing_tables(&self) -> DatabaseResult<Vec<WarehouseTable>> {
        let names: Vec<String> = WarehouseTable::ALL
            .iter()
            .map(|t| format!("'{}'", t.name()))
            .collect();
        let sql = format!(
            "SELECT table_name FROM information_schema.tables WHERE table_name IN ({})",
            names.join(", ")
        );

        let result = self.backend.execute_query(&sql).await?;
        let found: Vec<String> = result
            .rows
            .iter()
            .filter_map(|row| row.get("table_name").and_then(|v| v.as_str()))
            .map(|s| s.to_lowercase())
            .collect();

        Ok(WarehouseTable::ALL
            .into_iter()
            .filter(|t| found.iter().any(|f| f == t.name()))
            .collect())
    }

    /// Number of rows currently in a table
    pub async fn row_count(&self, table: WarehouseTable) -> DatabaseResult<i64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", table.ident());
        let result = self.backend.execute_query(&sql).await?;
        Ok(result.scalar_i64().unwrap_or(0))
    }
}
