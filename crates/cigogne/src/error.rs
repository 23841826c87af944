//! Error types for the migration engine
//!
//! Every failure of configuration resolution, pool startup, statement
//! execution and transaction handling collapses into [`MigrateError`].
//! [`error_message`] is the single place an error becomes display text.

use std::fmt;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Closed error taxonomy for the migration engine
#[derive(Debug, Clone, PartialEq)]
pub enum MigrateError {
    /// A required environment variable was absent
    EnvVarUnset(String),
    /// A connection URL failed to parse
    IncorrectConnectionString(String),
    /// The connection pool failed to start
    ActorStart(StartError),
    /// A single statement failed
    Query(QueryError),
    /// A transaction failed or was rolled back
    Transaction(TransactionError),
}

/// Reasons the connection pool could not be started
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error("timed out while starting the connection pool")]
    Timeout,

    #[error("connection pool failed to initialize: {0}")]
    InitFailed(String),

    #[error("connection pool exited abnormally: {0}")]
    Exited(String),
}

/// Statement execution failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("no connection available")]
    ConnectionUnavailable,

    #[error("constraint `{constraint}` violated: {message}")]
    ConstraintViolated {
        message: String,
        constraint: String,
        detail: Option<String>,
    },

    #[error("PostgreSQL error [{code}] {name}: {message}")]
    Postgres {
        code: String,
        name: String,
        message: String,
    },

    #[error("expected {expected} arguments, got {got}")]
    UnexpectedArgumentCount { expected: usize, got: usize },

    #[error("expected argument of type {expected}, got {got}")]
    UnexpectedArgumentType { expected: String, got: String },

    #[error("unexpected result type: {0}")]
    UnexpectedResultType(String),

    #[error("query timed out")]
    Timeout,
}

/// Transaction failures. `RolledBack` nests a full [`MigrateError`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionError {
    /// Beginning or committing the transaction failed
    Query(QueryError),
    /// The transaction was rolled back because its body failed
    RolledBack(Box<MigrateError>),
}

impl MigrateError {
    /// Wrap an error raised inside a transaction body
    pub fn rolled_back(cause: MigrateError) -> Self {
        MigrateError::Transaction(TransactionError::RolledBack(Box::new(cause)))
    }

    /// Innermost error, following nested transaction rollbacks
    pub fn root_cause(&self) -> &MigrateError {
        match self {
            MigrateError::Transaction(TransactionError::RolledBack(inner)) => inner.root_cause(),
            other => other,
        }
    }
}

/// Render any error of the taxonomy as a human-readable message
pub fn error_message(error: &MigrateError) -> String {
    match error {
        MigrateError::EnvVarUnset(name) => {
            format!("Environment variable {} is not set", name)
        }
        MigrateError::IncorrectConnectionString(value) => {
            format!("Invalid connection string: {}", value)
        }
        MigrateError::ActorStart(cause) => {
            format!("Could not start the database connection: {}", cause)
        }
        MigrateError::Query(cause) => format!("Query error: {}", cause),
        MigrateError::Transaction(TransactionError::Query(cause)) => {
            format!("Transaction error: {}", cause)
        }
        MigrateError::Transaction(TransactionError::RolledBack(inner)) => {
            format!("Transaction rolled back: {}", error_message(inner))
        }
    }
}

impl fmt::Display for MigrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&error_message(self))
    }
}

impl std::error::Error for MigrateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrateError::ActorStart(cause) => Some(cause),
            MigrateError::Query(cause) => Some(cause),
            MigrateError::Transaction(TransactionError::Query(cause)) => Some(cause),
            MigrateError::Transaction(TransactionError::RolledBack(inner)) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

impl From<QueryError> for MigrateError {
    fn from(err: QueryError) -> Self {
        MigrateError::Query(err)
    }
}

impl From<StartError> for MigrateError {
    fn from(err: StartError) -> Self {
        MigrateError::ActorStart(err)
    }
}

impl From<TransactionError> for MigrateError {
    fn from(err: TransactionError) -> Self {
        MigrateError::Transaction(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syntax_error() -> QueryError {
        QueryError::Postgres {
            code: "42601".to_string(),
            name: "syntax_error".to_string(),
            message: "syntax error at or near \"TABEL\"".to_string(),
        }
    }

    #[test]
    fn test_leaf_messages() {
        assert_eq!(
            error_message(&MigrateError::EnvVarUnset("DATABASE_URL".to_string())),
            "Environment variable DATABASE_URL is not set"
        );
        assert_eq!(
            error_message(&MigrateError::IncorrectConnectionString("nope".to_string())),
            "Invalid connection string: nope"
        );
        assert_eq!(
            error_message(&MigrateError::ActorStart(StartError::Timeout)),
            "Could not start the database connection: timed out while starting the connection pool"
        );
        assert_eq!(
            error_message(&MigrateError::Query(QueryError::Timeout)),
            "Query error: query timed out"
        );
    }

    #[test]
    fn test_postgres_error_message_includes_code_and_name() {
        let message = error_message(&syntax_error().into());
        assert!(message.starts_with("Query error: PostgreSQL error [42601] syntax_error"));
    }

    #[test]
    fn test_rolled_back_message_unwraps_nested_causes() {
        let inner = MigrateError::rolled_back(MigrateError::Query(syntax_error()));
        let outer = MigrateError::rolled_back(inner);

        let message = error_message(&outer);
        assert_eq!(
            message,
            "Transaction rolled back: Transaction rolled back: Query error: \
             PostgreSQL error [42601] syntax_error: syntax error at or near \"TABEL\""
        );
        assert_eq!(outer.to_string(), message);
        assert_eq!(outer.root_cause(), &MigrateError::Query(syntax_error()));
    }

    #[test]
    fn test_transaction_query_error_message() {
        let err = MigrateError::Transaction(TransactionError::Query(QueryError::ConnectionUnavailable));
        assert_eq!(error_message(&err), "Transaction error: no connection available");
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let err = MigrateError::rolled_back(MigrateError::Query(QueryError::Timeout));
        let source = err.source().expect("rolled back error has a source");
        assert_eq!(source.to_string(), "Query error: query timed out");
        assert!(MigrateError::EnvVarUnset("X".to_string()).source().is_none());
    }
}
