//! PostgreSQL Backend Implementation
//!
//! Implements the backend traits with sqlx. Statements without parameters
//! go through the simple query protocol so that commands PostgreSQL refuses
//! to prepare still run; parameterized statements are bound positionally.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgArguments, PgDatabaseError, PgPool, PgRow};
use sqlx::{Column, Postgres, Row, TypeInfo, ValueRef};

use super::core::*;
use crate::error::QueryError;

/// SQLSTATE raised when `statement_timeout` cancels a statement
const QUERY_CANCELED: &str = "57014";

/// PostgreSQL connection pool implementation
#[derive(Debug, Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn acquire(&self) -> Result<Box<dyn DatabaseExecutor>, QueryError> {
        let conn = self.pool.acquire().await.map_err(classify_error)?;
        tracing::debug!(
            "Database connection acquired (total: {}, idle: {})",
            self.pool.size(),
            self.pool.num_idle()
        );
        Ok(Box::new(PostgresSession { conn }))
    }

    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>, QueryError> {
        let tx = self.pool.begin().await.map_err(classify_error)?;
        tracing::debug!("Database transaction started");
        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// A pooled connection used outside of any transaction
pub struct PostgresSession {
    conn: sqlx::pool::PoolConnection<Postgres>,
}

#[async_trait]
impl DatabaseExecutor for PostgresSession {
    async fn execute(&mut self, statement: &Statement) -> Result<u64, QueryError> {
        execute_on(&mut *self.conn, statement).await
    }

    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<DatabaseRow>, QueryError> {
        fetch_all_on(&mut *self.conn, statement).await
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn inner(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>, QueryError> {
        self.tx.as_mut().ok_or(QueryError::ConnectionUnavailable)
    }
}

#[async_trait]
impl DatabaseExecutor for PostgresTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<u64, QueryError> {
        let tx = self.inner()?;
        execute_on(&mut **tx, statement).await
    }

    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<DatabaseRow>, QueryError> {
        let tx = self.inner()?;
        fetch_all_on(&mut **tx, statement).await
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn commit(self: Box<Self>) -> Result<(), QueryError> {
        let tx = self.tx.ok_or(QueryError::ConnectionUnavailable)?;
        tx.commit().await.map_err(classify_error)?;
        tracing::debug!("Database transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), QueryError> {
        let tx = self.tx.ok_or(QueryError::ConnectionUnavailable)?;
        tx.rollback().await.map_err(classify_error)?;
        tracing::debug!("Database transaction rolled back");
        Ok(())
    }

    fn as_executor(&mut self) -> &mut dyn DatabaseExecutor {
        self
    }
}

async fn execute_on(
    conn: &mut sqlx::PgConnection,
    statement: &Statement,
) -> Result<u64, QueryError> {
    tracing::debug!(sql = %statement.sql, "Executing statement");

    let result = if statement.params.is_empty() {
        sqlx::Executor::execute(conn, statement.sql.as_str()).await
    } else {
        statement.check_arguments()?;
        bind_statement(statement)?.execute(conn).await
    };

    result.map(|r| r.rows_affected()).map_err(classify_error)
}

async fn fetch_all_on(
    conn: &mut sqlx::PgConnection,
    statement: &Statement,
) -> Result<Vec<DatabaseRow>, QueryError> {
    tracing::debug!(sql = %statement.sql, "Fetching rows");
    statement.check_arguments()?;

    let rows = bind_statement(statement)?
        .fetch_all(conn)
        .await
        .map_err(classify_error)?;

    rows.iter().map(decode_row).collect()
}

/// Bind every parameter of a statement to a sqlx query
fn bind_statement(
    statement: &Statement,
) -> Result<sqlx::query::Query<'_, Postgres, PgArguments>, QueryError> {
    let mut query = sqlx::query(&statement.sql);
    for param in &statement.params {
        query = match param {
            DatabaseValue::Null => query.bind(Option::<String>::None),
            DatabaseValue::Bool(b) => query.bind(*b),
            DatabaseValue::Int32(i) => query.bind(*i),
            DatabaseValue::Int64(i) => query.bind(*i),
            DatabaseValue::String(s) => query.bind(s.clone()),
            DatabaseValue::Timestamp(ts) => query.bind(*ts),
        };
    }
    Ok(query)
}

/// Convert a PostgreSQL row into a [`DatabaseRow`]
fn decode_row(row: &PgRow) -> Result<DatabaseRow, QueryError> {
    let mut values = Vec::with_capacity(row.len());

    for (index, column) in row.columns().iter().enumerate() {
        let is_null = row.try_get_raw(index).map_err(classify_error)?.is_null();
        if is_null {
            values.push(DatabaseValue::Null);
            continue;
        }

        let value = match column.type_info().name() {
            "BOOL" => DatabaseValue::Bool(row.try_get(index).map_err(classify_error)?),
            "INT2" => {
                let value: i16 = row.try_get(index).map_err(classify_error)?;
                DatabaseValue::Int32(value as i32)
            }
            "INT4" => DatabaseValue::Int32(row.try_get(index).map_err(classify_error)?),
            "INT8" => DatabaseValue::Int64(row.try_get(index).map_err(classify_error)?),
            "TEXT" | "VARCHAR" | "NAME" | "BPCHAR" => {
                DatabaseValue::String(row.try_get(index).map_err(classify_error)?)
            }
            "TIMESTAMP" => {
                let value: NaiveDateTime = row.try_get(index).map_err(classify_error)?;
                DatabaseValue::Timestamp(value)
            }
            "TIMESTAMPTZ" => {
                let value: DateTime<Utc> = row.try_get(index).map_err(classify_error)?;
                DatabaseValue::Timestamp(value.naive_utc())
            }
            other => {
                return Err(QueryError::UnexpectedResultType(format!(
                    "unsupported type {} for column '{}'",
                    other,
                    column.name()
                )))
            }
        };
        values.push(value);
    }

    Ok(DatabaseRow::new(values))
}

/// Classify sqlx errors into the query error taxonomy
pub fn classify_error(error: sqlx::Error) -> QueryError {
    match error {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            let message = db_err.message().to_string();

            if code == QUERY_CANCELED {
                return QueryError::Timeout;
            }

            if let Some(constraint) = db_err.constraint() {
                let detail = db_err
                    .try_downcast_ref::<PgDatabaseError>()
                    .and_then(|e| e.detail())
                    .map(str::to_string);
                return QueryError::ConstraintViolated {
                    message,
                    constraint: constraint.to_string(),
                    detail,
                };
            }

            QueryError::Postgres {
                name: condition_name(&code).to_string(),
                code,
                message,
            }
        }
        unavailable @ (sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)) => {
            tracing::warn!("Database connection unavailable: {}", unavailable);
            QueryError::ConnectionUnavailable
        }
        sqlx::Error::ColumnDecode { index, source } => {
            QueryError::UnexpectedResultType(format!("column {}: {}", index, source))
        }
        sqlx::Error::Decode(source) => QueryError::UnexpectedResultType(source.to_string()),
        sqlx::Error::ColumnNotFound(name) => {
            QueryError::UnexpectedResultType(format!("column '{}' not found", name))
        }
        sqlx::Error::ColumnIndexOutOfBounds { index, len } => QueryError::UnexpectedResultType(
            format!("column index {} out of bounds for {} columns", index, len),
        ),
        sqlx::Error::RowNotFound => {
            QueryError::UnexpectedResultType("query returned no rows".to_string())
        }
        sqlx::Error::TypeNotFound { type_name } => QueryError::UnexpectedArgumentType {
            expected: type_name,
            got: "unregistered type".to_string(),
        },
        other => QueryError::Postgres {
            code: String::new(),
            name: "driver_error".to_string(),
            message: other.to_string(),
        },
    }
}

/// Condition name for well-known SQLSTATE codes
pub fn condition_name(code: &str) -> &'static str {
    match code {
        "08006" => "connection_failure",
        "22P02" => "invalid_text_representation",
        "23502" => "not_null_violation",
        "23503" => "foreign_key_violation",
        "23505" => "unique_violation",
        "23514" => "check_violation",
        "25001" => "active_sql_transaction",
        "3F000" => "invalid_schema_name",
        "40001" => "serialization_failure",
        "40P01" => "deadlock_detected",
        "42501" => "insufficient_privilege",
        "42601" => "syntax_error",
        "42701" => "duplicate_column",
        "42703" => "undefined_column",
        "42704" => "undefined_object",
        "42P01" => "undefined_table",
        "42P06" => "duplicate_schema",
        "42P07" => "duplicate_table",
        "57014" => "query_canceled",
        _ => "unknown",
    }
}
