//! Connection configuration
//!
//! A connection can be described four ways: through environment variables,
//! a URL, an already-open pool, or field by field. [`resolve_connection`]
//! turns any of them into a single [`ConnectionDescriptor`].
//!
//! Environment reads go through [`EnvSource`] so callers (and tests) decide
//! where variables come from.

use std::collections::HashMap;
use std::fmt;

use sqlx::postgres::{PgConnectOptions, PgPool, PgSslMode};
use sqlx::ConnectOptions;
use url::Url;

use crate::database::PoolConfig;
use crate::error::{MigrateError, MigrateResult};

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_MIGRATIONS_TABLE: &str = "_migrations";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_USER: &str = "postgres";
pub const DEFAULT_DATABASE: &str = "postgres";

pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const DB_HOST_VAR: &str = "DB_HOST";
pub const DB_USER_VAR: &str = "DB_USER";
pub const DB_PASSWORD_VAR: &str = "DB_PASSWORD";
pub const DB_NAME_VAR: &str = "DB_NAME";
pub const DB_PORT_VAR: &str = "DB_PORT";

/// Source of environment variables.
///
/// Only the `DATABASE_URL` and `DB_*` variables are read through it. For
/// URL connections the driver still fills settings the URL leaves out
/// (SSL certificates, `PGOPTIONS`, application name) from the process
/// `PG*` variables; field-by-field connections set host, port, user,
/// password, database and SSL mode explicitly.
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Field-by-field connection settings; unset fields use the defaults
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DetailedConfig {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
}

impl DetailedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Debug for DetailedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetailedConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .field("port", &self.port)
            .field("name", &self.name)
            .finish()
    }
}

/// The accepted ways of describing a connection
#[derive(Clone, Default)]
pub enum ConnectionConfig {
    /// `DATABASE_URL`, or else `DB_HOST`/`DB_USER`/`DB_PASSWORD`/`DB_NAME`/`DB_PORT`
    #[default]
    Env,
    /// A `postgres://` connection URL
    Url(String),
    /// A pool the caller already opened
    Pool(PgPool),
    /// Explicit fields
    Detailed(DetailedConfig),
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionConfig::Env => f.write_str("Env"),
            ConnectionConfig::Url(raw) => f.debug_tuple("Url").field(&redact_raw_url(raw)).finish(),
            ConnectionConfig::Pool(pool) => f.debug_tuple("Pool").field(pool).finish(),
            ConnectionConfig::Detailed(detailed) => f.debug_tuple("Detailed").field(detailed).finish(),
        }
    }
}

/// Normalized host/port/user/password/database
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

impl ConnectParams {
    pub fn from_detailed(detailed: &DetailedConfig) -> Self {
        Self {
            host: detailed.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: detailed.port.unwrap_or(DEFAULT_PORT),
            user: detailed.user.clone().unwrap_or_else(|| DEFAULT_USER.to_string()),
            password: detailed.password.clone(),
            database: detailed.name.clone().unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
        }
    }

    /// Driver options with every credential-bearing setting taken from
    /// these params, never from `PG*` variables or a pgpass file
    pub fn to_connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(self.password.as_deref().unwrap_or_default())
            .database(&self.database)
            .ssl_mode(PgSslMode::Prefer)
    }
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .field("database", &self.database)
            .finish()
    }
}

/// A resolved connection description
#[derive(Clone)]
pub enum ConnectionDescriptor {
    Params(ConnectParams),
    /// A URL already accepted by the driver
    Url { url: Url, options: PgConnectOptions },
    Pool(PgPool),
}

impl ConnectionDescriptor {
    /// Human-readable target with credentials removed, for logs
    pub fn redacted(&self) -> String {
        match self {
            ConnectionDescriptor::Params(params) => format!(
                "postgres://{}@{}:{}/{}",
                params.user, params.host, params.port, params.database
            ),
            ConnectionDescriptor::Url { url, .. } => redact_url(url),
            ConnectionDescriptor::Pool(_) => "existing pool".to_string(),
        }
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionDescriptor({})", self.redacted())
    }
}

const REDACTED: &str = "***";

fn redact_url(url: &Url) -> String {
    let mut url = url.clone();
    if url.password().is_some() {
        let _ = url.set_password(Some(REDACTED));
    }
    url.to_string()
}

fn redact_raw_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => redact_url(&url),
        Err(_) => "<unparseable url>".to_string(),
    }
}

/// Everything needed to open a [`crate::Database`]
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    pub connection: ConnectionConfig,
    pub db_schema: Option<String>,
    pub migrations_table: Option<String>,
    pub pool: PoolConfig,
}

impl DatabaseConfig {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.db_schema = Some(schema.into());
        self
    }

    pub fn with_migrations_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = Some(table.into());
        self
    }

    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Configured schema, or `public`
    pub fn schema(&self) -> &str {
        self.db_schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }

    /// Configured tracking table, or `_migrations`
    pub fn table(&self) -> &str {
        self.migrations_table.as_deref().unwrap_or(DEFAULT_MIGRATIONS_TABLE)
    }
}

/// Resolve a connection configuration into a descriptor.
pub fn resolve_connection(
    config: &ConnectionConfig,
    env: &dyn EnvSource,
) -> MigrateResult<ConnectionDescriptor> {
    match config {
        ConnectionConfig::Env => resolve_env(env),
        ConnectionConfig::Url(url) => parse_url(url),
        ConnectionConfig::Pool(pool) => Ok(ConnectionDescriptor::Pool(pool.clone())),
        ConnectionConfig::Detailed(detailed) => {
            Ok(ConnectionDescriptor::Params(ConnectParams::from_detailed(detailed)))
        }
    }
}

fn resolve_env(env: &dyn EnvSource) -> MigrateResult<ConnectionDescriptor> {
    if let Some(url) = env.var(DATABASE_URL_VAR) {
        tracing::debug!("Using {} for the database connection", DATABASE_URL_VAR);
        return parse_url(&url);
    }

    let port = match env.var(DB_PORT_VAR) {
        Some(raw) => Some(raw.trim().parse::<u16>().map_err(|_| {
            MigrateError::IncorrectConnectionString(format!("{}={}", DB_PORT_VAR, raw))
        })?),
        None => None,
    };

    let detailed = DetailedConfig {
        host: env.var(DB_HOST_VAR),
        user: env.var(DB_USER_VAR),
        password: env.var(DB_PASSWORD_VAR),
        port,
        name: env.var(DB_NAME_VAR),
    };

    if detailed == DetailedConfig::default() {
        return Err(MigrateError::EnvVarUnset(DATABASE_URL_VAR.to_string()));
    }

    Ok(ConnectionDescriptor::Params(ConnectParams::from_detailed(&detailed)))
}

/// Parse and validate a PostgreSQL connection URL, including the query
/// parameters the driver understands
pub fn parse_url(raw: &str) -> MigrateResult<ConnectionDescriptor> {
    let incorrect = || MigrateError::IncorrectConnectionString(raw.to_string());
    let url = Url::parse(raw).map_err(|_| incorrect())?;

    match url.scheme() {
        "postgres" | "postgresql" => {}
        _ => return Err(incorrect()),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(incorrect());
    }

    let options = PgConnectOptions::from_url(&url).map_err(|err| {
        tracing::debug!("Driver rejected connection URL {}: {}", redact_url(&url), err);
        incorrect()
    })?;

    Ok(ConnectionDescriptor::Url { url, options })
}
