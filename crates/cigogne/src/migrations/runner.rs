//! Migration Runner - Executes migrations against the database
//!
//! Each migration runs its statements in order and then writes (or removes)
//! its bookkeeping row. The transactional variants do both inside one
//! transaction, so a failure leaves nothing behind.
//!
//! The `_no_transaction` variants exist for statements PostgreSQL refuses to
//! run inside a transaction block, such as `CREATE INDEX CONCURRENTLY`. They
//! give no atomicity: if statement N fails, statements 1..N-1 stay applied
//! and no bookkeeping row is written (or, when rolling back, the row stays).
//! Nothing compensates for that; the operator has to repair by hand.
//!
//! The runner applies exactly what it is given. Filtering out migrations
//! that are already applied is up to the caller (see
//! [`super::history::find_unapplied`]).

use std::time::Instant;

use tracing::{debug, info, warn};

use super::definitions::{Migration, MigrationDirection, MigrationRunResult};
use crate::backends::{DatabaseExecutor, Statement};
use crate::database::Database;
use crate::error::{MigrateError, MigrateResult};
use crate::transaction::{begin_transaction, finish_transaction};

impl Database {
    /// Apply a migration and record it, atomically
    pub async fn apply_migration(&self, migration: &Migration) -> MigrateResult<()> {
        self.run_in_transaction(migration, MigrationDirection::Up).await
    }

    /// Roll back a migration and remove its record, atomically
    pub async fn rollback_migration(&self, migration: &Migration) -> MigrateResult<()> {
        self.run_in_transaction(migration, MigrationDirection::Down).await
    }

    /// Apply a migration without a transaction. See the module docs for
    /// what a failure leaves behind.
    pub async fn apply_migration_no_transaction(&self, migration: &Migration) -> MigrateResult<()> {
        self.run_without_transaction(migration, MigrationDirection::Up).await
    }

    /// Roll back a migration without a transaction. See the module docs for
    /// what a failure leaves behind.
    pub async fn rollback_migration_no_transaction(&self, migration: &Migration) -> MigrateResult<()> {
        self.run_without_transaction(migration, MigrationDirection::Down).await
    }

    /// Apply migrations one by one in the given order, stopping at the
    /// first failure. Migrations before the failing one stay applied.
    pub async fn apply_migrations(&self, migrations: &[Migration]) -> MigrateResult<MigrationRunResult> {
        let start_time = Instant::now();
        let mut applied_migrations = Vec::with_capacity(migrations.len());

        for migration in migrations {
            if let Err(err) = self.apply_migration(migration).await {
                warn!(
                    "Stopped after {} of {} migrations: {}",
                    applied_migrations.len(),
                    migrations.len(),
                    err
                );
                return Err(err);
            }
            applied_migrations.push(migration.full_name());
        }

        Ok(MigrationRunResult {
            applied_count: applied_migrations.len(),
            applied_migrations,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    async fn run_in_transaction(
        &self,
        migration: &Migration,
        direction: MigrationDirection,
    ) -> MigrateResult<()> {
        let full_name = migration.full_name();
        info!("Running {} of migration {}", direction.as_str(), full_name);

        let mut tx = begin_transaction(self).await?;
        let outcome = self.run_steps(tx.as_executor(), migration, direction).await;
        finish_transaction(tx, outcome).await.map_err(|err| {
            warn!("Migration {} was not {}: {}", full_name, past_tense(direction), err);
            err
        })?;

        info!("Migration {} {}", full_name, past_tense(direction));
        Ok(())
    }

    async fn run_without_transaction(
        &self,
        migration: &Migration,
        direction: MigrationDirection,
    ) -> MigrateResult<()> {
        let full_name = migration.full_name();
        warn!(
            "Running {} of migration {} outside a transaction; a failure may leave it partially applied",
            direction.as_str(),
            full_name
        );

        let mut session = self.backend().acquire().await?;
        if let Err(err) = self.run_steps(&mut *session, migration, direction).await {
            warn!(
                "Migration {} failed outside a transaction and may be partially {}: {}",
                full_name,
                past_tense(direction),
                err
            );
            return Err(err);
        }

        info!("Migration {} {}", full_name, past_tense(direction));
        Ok(())
    }

    /// Run the statements of one direction, then the bookkeeping write
    async fn run_steps(
        &self,
        executor: &mut dyn DatabaseExecutor,
        migration: &Migration,
        direction: MigrationDirection,
    ) -> MigrateResult<()> {
        let queries = match direction {
            MigrationDirection::Up => &migration.queries_up,
            MigrationDirection::Down => &migration.queries_down,
        };

        for (index, sql) in queries.iter().enumerate() {
            if sql.trim().is_empty() {
                continue;
            }
            debug!("{} statement {}/{}", migration.name, index + 1, queries.len());
            executor
                .execute(&Statement::new(sql.as_str()))
                .await
                .map_err(MigrateError::Query)?;
        }

        match direction {
            MigrationDirection::Up => {
                executor.execute(&self.record_migration_statement(migration)).await?;
            }
            MigrationDirection::Down => {
                let removed = executor.execute(&self.remove_migration_statement(migration)).await?;
                if removed == 0 {
                    warn!("No bookkeeping row found for migration {}", migration.full_name());
                }
            }
        }

        Ok(())
    }

    /// Insert of the bookkeeping row
    pub(crate) fn record_migration_statement(&self, migration: &Migration) -> Statement {
        Statement::new(format!(
            "INSERT INTO {} (createdAt, name, sha256) VALUES ($1, $2, $3)",
            self.qualified_table()
        ))
        .bind(migration.created_at)
        .bind(migration.name.as_str())
        .bind(migration.content_hash.as_str())
    }

    /// Delete of the bookkeeping row
    pub(crate) fn remove_migration_statement(&self, migration: &Migration) -> Statement {
        Statement::new(format!(
            "DELETE FROM {} WHERE name = $1 AND createdAt = $2",
            self.qualified_table()
        ))
        .bind(migration.name.as_str())
        .bind(migration.created_at)
    }
}

fn past_tense(direction: MigrationDirection) -> &'static str {
    match direction {
        MigrationDirection::Up => "applied",
        MigrationDirection::Down => "rolled back",
    }
}
