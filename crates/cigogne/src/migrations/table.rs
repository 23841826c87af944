//! Tracking table bootstrap
//!
//! The tracking table is created by the zero migration, which goes through
//! the same transactional path as every other migration and therefore
//! records itself as the first applied row.

use chrono::NaiveDateTime;

use super::definitions::Migration;
use crate::backends::Statement;
use crate::database::Database;
use crate::error::MigrateResult;

/// Name recorded for the bootstrap migration
pub const ZERO_MIGRATION_NAME: &str = "CreateMigrationsTable";

/// Placeholder hash recorded for the bootstrap migration
pub const ZERO_MIGRATION_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

impl Database {
    /// Whether the tracking table exists in the configured schema
    pub async fn migrations_table_exists(&self) -> MigrateResult<bool> {
        let mut session = self.backend().acquire().await?;
        let rows = session.fetch_all(&self.table_exists_statement()).await?;
        Ok(!rows.is_empty())
    }

    /// Create the tracking table unless it already exists
    pub async fn apply_cigogne_zero(&self) -> MigrateResult<()> {
        if self.migrations_table_exists().await? {
            tracing::debug!("Migrations table {} already exists", self.qualified_table());
            return Ok(());
        }

        tracing::info!("Creating migrations table {}", self.qualified_table());
        self.apply_migration(&self.zero_migration()).await
    }

    /// The bootstrap migration for this handle's schema and table
    pub fn zero_migration(&self) -> Migration {
        Migration::new(
            ZERO_MIGRATION_NAME,
            NaiveDateTime::default(),
            vec![
                format!("CREATE SCHEMA IF NOT EXISTS {};", self.db_schema()),
                self.create_migrations_table_sql(),
            ],
            Vec::new(),
            ZERO_MIGRATION_HASH,
        )
    }

    /// SQL to create the migrations tracking table
    pub(crate) fn create_migrations_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {}(\n    \
                id INTEGER PRIMARY KEY GENERATED ALWAYS AS IDENTITY,\n    \
                name VARCHAR(255) NOT NULL,\n    \
                sha256 VARCHAR(64) NOT NULL,\n    \
                createdAt TIMESTAMP WITHOUT TIME ZONE NOT NULL,\n    \
                appliedAt TIMESTAMP NOT NULL DEFAULT NOW()\n\
            );",
            self.qualified_table()
        )
    }

    /// Catalog lookup for the tracking table
    pub(crate) fn table_exists_statement(&self) -> Statement {
        Statement::new(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_name = $1 AND table_schema = $2 AND table_type = 'BASE TABLE'",
        )
        .bind(self.migrations_table())
        .bind(self.db_schema())
    }
}
