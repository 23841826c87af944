//! # cigogne: PostgreSQL migration engine
//!
//! Applies and rolls back migrations, records them in a tracking table and
//! reads the applied history back. Discovering migration files and hashing
//! their content is left to the caller; this crate consumes ready-made
//! [`Migration`] values.
//!
//! ```no_run
//! use cigogne::{ConnectionConfig, Database, DatabaseConfig, MigrateResult, Migration};
//!
//! # async fn run(migrations: Vec<Migration>) -> MigrateResult<()> {
//! let db = Database::init(DatabaseConfig::new(ConnectionConfig::Env)).await?;
//! db.apply_cigogne_zero().await?;
//!
//! let applied = db.get_applied_migrations().await?;
//! for migration in cigogne::find_unapplied(&migrations, &applied) {
//!     db.apply_migration(migration).await?;
//! }
//!
//! db.close().await;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod database;
pub mod error;
pub mod migrations;
pub mod transaction;

#[cfg(test)]
mod fake;

pub use backends::{DatabaseExecutor, DatabasePool, DatabaseRow, DatabaseValue, Statement};
pub use config::{ConnectionConfig, DatabaseConfig, DetailedConfig, EnvSource, ProcessEnv};
pub use database::{Database, PoolConfig};
pub use error::*;
pub use migrations::*;
pub use transaction::BoxFuture;
