//! Database handle and connection provider
//!
//! [`Database`] owns the pool (behind [`DatabasePool`]) together with the
//! schema and tracking-table names. Both names are copied in at
//! construction and never change afterwards.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::backends::{DatabasePool, PostgresPool};
use crate::config::{
    resolve_connection, ConnectionDescriptor, DatabaseConfig, EnvSource, ProcessEnv,
};
use crate::error::{MigrateError, MigrateResult, StartError};

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
    pub idle_timeout: Option<u64>,
    pub max_lifetime: Option<u64>,
    pub test_before_acquire: bool,
    /// Defer opening connections until the first statement runs
    pub connect_lazily: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 0,
            acquire_timeout: 30,
            idle_timeout: Some(600),
            max_lifetime: Some(1800),
            test_before_acquire: true,
            connect_lazily: false,
        }
    }
}

impl PoolConfig {
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout_seconds: u64) -> Self {
        self.acquire_timeout = timeout_seconds;
        self
    }

    pub fn with_lazy_connect(mut self, enabled: bool) -> Self {
        self.connect_lazily = enabled;
        self
    }

    fn pool_options(&self) -> PgPoolOptions {
        let mut options = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout))
            .test_before_acquire(self.test_before_acquire);

        if let Some(idle_timeout) = self.idle_timeout {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }
        if let Some(max_lifetime) = self.max_lifetime {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        options
    }
}

/// Live database handle shared by every migration operation
#[derive(Clone)]
pub struct Database {
    backend: Arc<dyn DatabasePool>,
    db_schema: String,
    migrations_table: String,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("db_schema", &self.db_schema)
            .field("migrations_table", &self.migrations_table)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open a database handle, reading environment variables from the process
    pub async fn init(config: DatabaseConfig) -> MigrateResult<Self> {
        Self::init_with_env(config, &ProcessEnv).await
    }

    /// Open a database handle, reading environment variables from `env`
    pub async fn init_with_env(config: DatabaseConfig, env: &dyn EnvSource) -> MigrateResult<Self> {
        let descriptor = resolve_connection(&config.connection, env)?;
        tracing::debug!("Resolved database connection: {}", descriptor.redacted());

        let pool = open_pool(descriptor, &config).await?;
        Ok(Self::from_pool(pool, config.schema(), config.table()))
    }

    /// Wrap a pool the caller already owns
    pub fn from_pool(pool: PgPool, db_schema: &str, migrations_table: &str) -> Self {
        Self::with_backend(Arc::new(PostgresPool::new(pool)), db_schema, migrations_table)
    }

    /// Wrap any backend implementing [`DatabasePool`]
    pub fn with_backend(
        backend: Arc<dyn DatabasePool>,
        db_schema: &str,
        migrations_table: &str,
    ) -> Self {
        Self {
            backend,
            db_schema: db_schema.to_string(),
            migrations_table: migrations_table.to_string(),
        }
    }

    pub fn db_schema(&self) -> &str {
        &self.db_schema
    }

    pub fn migrations_table(&self) -> &str {
        &self.migrations_table
    }

    /// `schema.table` as interpolated into the tracking queries
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.db_schema, self.migrations_table)
    }

    pub fn backend(&self) -> &dyn DatabasePool {
        self.backend.as_ref()
    }

    /// Close the underlying pool
    pub async fn close(&self) {
        self.backend.close().await;
        tracing::debug!("Database pool closed");
    }
}

async fn open_pool(descriptor: ConnectionDescriptor, config: &DatabaseConfig) -> MigrateResult<PgPool> {
    let target = descriptor.redacted();
    let connect_options = match descriptor {
        ConnectionDescriptor::Pool(pool) => {
            tracing::debug!("Reusing caller-supplied connection pool");
            return Ok(pool);
        }
        ConnectionDescriptor::Params(params) => params.to_connect_options(),
        ConnectionDescriptor::Url { options, .. } => options,
    };

    let options = config.pool.pool_options();
    if config.pool.connect_lazily {
        tracing::info!("Created lazy database pool for {}", target);
        return Ok(options.connect_lazy_with(connect_options));
    }

    let pool = options
        .connect_with(connect_options)
        .await
        .map_err(classify_start_error)?;

    tracing::info!(
        "Connected to {} (max_connections={})",
        target,
        config.pool.max_connections
    );
    Ok(pool)
}

/// Classify pool startup failures
fn classify_start_error(error: sqlx::Error) -> MigrateError {
    let start_error = match error {
        sqlx::Error::PoolTimedOut => StartError::Timeout,
        exited @ (sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::PoolClosed) => StartError::Exited(exited.to_string()),
        other => StartError::InitFailed(other.to_string()),
    };
    tracing::warn!("Failed to start database pool: {}", start_error);
    MigrateError::ActorStart(start_error)
}
