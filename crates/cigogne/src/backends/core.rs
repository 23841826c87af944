//! Core Database Backend Traits
//!
//! The engine talks to the database only through these traits: run a
//! statement, fetch rows, and open a transaction that can be committed or
//! rolled back. Any pool implementation can sit behind them.

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::QueryError;

/// Parameter and column values understood by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
    Timestamp(NaiveDateTime),
}

impl DatabaseValue {
    /// PostgreSQL type name, used in decoding error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            DatabaseValue::Null => "NULL",
            DatabaseValue::Bool(_) => "BOOL",
            DatabaseValue::Int32(_) => "INT4",
            DatabaseValue::Int64(_) => "INT8",
            DatabaseValue::String(_) => "TEXT",
            DatabaseValue::Timestamp(_) => "TIMESTAMP",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            DatabaseValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<NaiveDateTime> for DatabaseValue {
    fn from(value: NaiveDateTime) -> Self {
        DatabaseValue::Timestamp(value)
    }
}

/// One SQL statement with its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

impl Statement {
    /// A statement without parameters
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append a positional parameter
    pub fn bind(mut self, value: impl Into<DatabaseValue>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Highest `$n` placeholder referenced by the SQL text.
    ///
    /// Placeholders inside single-quoted literals are ignored.
    pub fn placeholder_count(&self) -> usize {
        let bytes = self.sql.as_bytes();
        let mut highest = 0;
        let mut in_literal = false;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'\'' => in_literal = !in_literal,
                b'$' if !in_literal => {
                    let start = i + 1;
                    let mut end = start;
                    while end < bytes.len() && bytes[end].is_ascii_digit() {
                        end += 1;
                    }
                    if end > start {
                        if let Ok(n) = self.sql[start..end].parse::<usize>() {
                            highest = highest.max(n);
                        }
                        i = end;
                        continue;
                    }
                }
                _ => {}
            }
            i += 1;
        }

        highest
    }

    /// Verify the parameter list matches the placeholders.
    ///
    /// Parameterless statements are sent as-is and never checked, since
    /// function bodies legitimately contain `$1`.
    pub fn check_arguments(&self) -> Result<(), QueryError> {
        if self.params.is_empty() {
            return Ok(());
        }
        let expected = self.placeholder_count();
        if expected != self.params.len() {
            return Err(QueryError::UnexpectedArgumentCount {
                expected,
                got: self.params.len(),
            });
        }
        Ok(())
    }
}

/// A decoded result row, columns in select order
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseRow {
    pub values: Vec<DatabaseValue>,
}

impl DatabaseRow {
    pub fn new(values: Vec<DatabaseValue>) -> Self {
        Self { values }
    }

    /// Get a column value by index
    pub fn get(&self, index: usize) -> Result<&DatabaseValue, QueryError> {
        self.values.get(index).ok_or_else(|| {
            QueryError::UnexpectedResultType(format!(
                "column {} out of bounds for row of {} columns",
                index,
                self.values.len()
            ))
        })
    }

    pub fn get_string(&self, index: usize) -> Result<String, QueryError> {
        let value = self.get(index)?;
        value.as_str().map(str::to_string).ok_or_else(|| {
            QueryError::UnexpectedResultType(format!(
                "expected TEXT in column {}, found {}",
                index,
                value.type_name()
            ))
        })
    }

    pub fn get_timestamp(&self, index: usize) -> Result<NaiveDateTime, QueryError> {
        let value = self.get(index)?;
        value.as_timestamp().ok_or_else(|| {
            QueryError::UnexpectedResultType(format!(
                "expected TIMESTAMP in column {}, found {}",
                index,
                value.type_name()
            ))
        })
    }
}

/// Something statements can be run against: a session or a transaction
#[async_trait]
pub trait DatabaseExecutor: Send {
    /// Execute a statement and return affected rows count
    async fn execute(&mut self, statement: &Statement) -> Result<u64, QueryError>;

    /// Execute a statement and return the result rows
    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<DatabaseRow>, QueryError>;
}

/// Abstract database transaction
#[async_trait]
pub trait DatabaseTransaction: DatabaseExecutor {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<(), QueryError>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<(), QueryError>;

    /// View the transaction as a plain executor
    fn as_executor(&mut self) -> &mut dyn DatabaseExecutor;
}

/// Abstract database connection pool
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Check out one session; statements on it run outside any transaction
    async fn acquire(&self) -> Result<Box<dyn DatabaseExecutor>, QueryError>;

    /// Begin a transaction from the pool
    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>, QueryError>;

    /// Close the pool
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_count() {
        let stmt = Statement::new("DELETE FROM public._migrations WHERE name = $1 AND createdAt = $2");
        assert_eq!(stmt.placeholder_count(), 2);

        let stmt = Statement::new("SELECT '$3' FROM t WHERE a = $1");
        assert_eq!(stmt.placeholder_count(), 1);

        let stmt = Statement::new("CREATE TABLE t (price TEXT)");
        assert_eq!(stmt.placeholder_count(), 0);
    }

    #[test]
    fn test_check_arguments() {
        let ok = Statement::new("INSERT INTO t (a, b) VALUES ($1, $2)")
            .bind("x")
            .bind(1);
        assert!(ok.check_arguments().is_ok());

        let short = Statement::new("INSERT INTO t (a, b) VALUES ($1, $2)").bind("x");
        assert_eq!(
            short.check_arguments(),
            Err(QueryError::UnexpectedArgumentCount { expected: 2, got: 1 })
        );

        let body = Statement::new("CREATE FUNCTION f(int) RETURNS int AS $$ SELECT $1 $$ LANGUAGE sql");
        assert!(body.check_arguments().is_ok());
    }

    #[test]
    fn test_row_typed_access() {
        let ts = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let row = DatabaseRow::new(vec![ts.into(), "users".into()]);

        assert_eq!(row.get_timestamp(0).unwrap(), ts);
        assert_eq!(row.get_string(1).unwrap(), "users");
        assert!(matches!(row.get_string(0), Err(QueryError::UnexpectedResultType(_))));
        assert!(matches!(row.get(5), Err(QueryError::UnexpectedResultType(_))));
    }
}
