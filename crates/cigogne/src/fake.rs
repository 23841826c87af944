//! In-memory backend for tests
//!
//! Understands just enough SQL to model the tracking table and plain
//! `CREATE TABLE`/`DROP TABLE` statements. Transactions work on a copy of
//! the state that replaces the shared state on commit.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::backends::{
    DatabaseExecutor, DatabasePool, DatabaseRow, DatabaseTransaction, DatabaseValue, Statement,
};
use crate::error::QueryError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TrackedRow {
    pub id: i64,
    pub name: String,
    pub sha256: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeState {
    pub tables: BTreeSet<String>,
    pub rows: Vec<TrackedRow>,
    pub next_id: i64,
}

#[derive(Default)]
struct Shared {
    state: Mutex<FakeState>,
    failing: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
    fail_commits: AtomicBool,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    sessions: AtomicUsize,
}

impl Shared {
    fn run(&self, state: &mut FakeState, statement: &Statement) -> Result<(u64, Vec<DatabaseRow>), QueryError> {
        self.executed.lock().unwrap().push(statement.sql.clone());
        statement.check_arguments()?;

        let failing = self.failing.lock().unwrap();
        if failing.iter().any(|fragment| statement.sql.contains(fragment.as_str())) {
            return Err(QueryError::Postgres {
                code: "42601".to_string(),
                name: "syntax_error".to_string(),
                message: format!("syntax error in \"{}\"", statement.sql),
            });
        }
        drop(failing);

        interpret(state, statement)
    }
}

#[derive(Default)]
pub(crate) struct FakeDatabase {
    shared: Arc<Shared>,
}

impl FakeDatabase {
    /// Any statement containing `fragment` fails with a syntax error
    pub fn fail_on(&self, fragment: &str) {
        self.shared.failing.lock().unwrap().push(fragment.to_string());
    }

    pub fn fail_commits(&self) {
        self.shared.fail_commits.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> FakeState {
        self.shared.state.lock().unwrap().clone()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state().tables.contains(&name.to_lowercase())
    }

    pub fn executed(&self) -> Vec<String> {
        self.shared.executed.lock().unwrap().clone()
    }

    pub fn commits(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> usize {
        self.shared.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabasePool for FakeDatabase {
    async fn acquire(&self) -> Result<Box<dyn DatabaseExecutor>, QueryError> {
        self.shared.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            shared: self.shared.clone(),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>, QueryError> {
        let working = self.state();
        Ok(Box::new(FakeTransaction {
            shared: self.shared.clone(),
            working,
        }))
    }

    async fn close(&self) {}
}

struct FakeSession {
    shared: Arc<Shared>,
}

#[async_trait]
impl DatabaseExecutor for FakeSession {
    async fn execute(&mut self, statement: &Statement) -> Result<u64, QueryError> {
        let mut state = self.shared.state.lock().unwrap();
        self.shared.run(&mut state, statement).map(|(affected, _)| affected)
    }

    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<DatabaseRow>, QueryError> {
        let mut state = self.shared.state.lock().unwrap();
        self.shared.run(&mut state, statement).map(|(_, rows)| rows)
    }
}

struct FakeTransaction {
    shared: Arc<Shared>,
    working: FakeState,
}

#[async_trait]
impl DatabaseExecutor for FakeTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<u64, QueryError> {
        self.shared.run(&mut self.working, statement).map(|(affected, _)| affected)
    }

    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<DatabaseRow>, QueryError> {
        self.shared.run(&mut self.working, statement).map(|(_, rows)| rows)
    }
}

#[async_trait]
impl DatabaseTransaction for FakeTransaction {
    async fn commit(self: Box<Self>) -> Result<(), QueryError> {
        let FakeTransaction { shared, working } = *self;
        if shared.fail_commits.load(Ordering::SeqCst) {
            return Err(QueryError::ConnectionUnavailable);
        }
        *shared.state.lock().unwrap() = working;
        shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), QueryError> {
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_executor(&mut self) -> &mut dyn DatabaseExecutor {
        self
    }
}

fn interpret(state: &mut FakeState, statement: &Statement) -> Result<(u64, Vec<DatabaseRow>), QueryError> {
    let sql = statement.sql.trim();
    let upper = sql.to_uppercase();

    if upper.starts_with("CREATE SCHEMA") {
        return Ok((0, Vec::new()));
    }

    if let Some(rest) = strip(sql, &upper, "CREATE TABLE IF NOT EXISTS") {
        state.tables.insert(object_name(rest));
        return Ok((0, Vec::new()));
    }

    if let Some(rest) = strip(sql, &upper, "CREATE TABLE") {
        let name = object_name(rest);
        if !state.tables.insert(name.clone()) {
            return Err(postgres_error("42P07", "duplicate_table", format!("relation \"{}\" already exists", name)));
        }
        return Ok((0, Vec::new()));
    }

    if let Some(rest) = strip(sql, &upper, "DROP TABLE IF EXISTS") {
        state.tables.remove(&object_name(rest));
        return Ok((0, Vec::new()));
    }

    if let Some(rest) = strip(sql, &upper, "DROP TABLE") {
        let name = object_name(rest);
        if !state.tables.remove(&name) {
            return Err(undefined_table(&name));
        }
        return Ok((0, Vec::new()));
    }

    if let Some(rest) = strip(sql, &upper, "INSERT INTO") {
        let name = object_name(rest);
        require_table(state, &name)?;
        if statement.params.is_empty() {
            return Ok((1, Vec::new()));
        }
        state.next_id += 1;
        let row = TrackedRow {
            id: state.next_id,
            created_at: param_timestamp(statement, 0)?,
            name: param_string(statement, 1)?,
            sha256: param_string(statement, 2)?,
        };
        state.rows.push(row);
        return Ok((1, Vec::new()));
    }

    if let Some(rest) = strip(sql, &upper, "DELETE FROM") {
        let name = object_name(rest);
        require_table(state, &name)?;
        if statement.params.is_empty() {
            return Ok((0, Vec::new()));
        }
        let target_name = param_string(statement, 0)?;
        let target_created = param_timestamp(statement, 1)?;
        let before = state.rows.len();
        state
            .rows
            .retain(|row| !(row.name == target_name && row.created_at == target_created));
        return Ok(((before - state.rows.len()) as u64, Vec::new()));
    }

    if upper.contains("INFORMATION_SCHEMA.TABLES") {
        let table = param_string(statement, 0)?;
        let schema = param_string(statement, 1)?;
        let qualified = format!("{}.{}", schema, table).to_lowercase();
        let rows = state
            .tables
            .iter()
            .filter(|t| **t == qualified)
            .map(|_| DatabaseRow::new(vec![DatabaseValue::String(table.clone())]))
            .collect();
        return Ok((0, rows));
    }

    if upper.starts_with("SELECT CREATEDAT") {
        let from = upper.find(" FROM ").map(|i| i + " FROM ".len()).unwrap_or(sql.len());
        let name = object_name(&sql[from..]);
        require_table(state, &name)?;
        let mut rows = state.rows.clone();
        rows.sort_by_key(|row| row.id);
        let rows = rows
            .into_iter()
            .map(|row| {
                DatabaseRow::new(vec![
                    DatabaseValue::Timestamp(row.created_at),
                    DatabaseValue::String(row.name),
                    DatabaseValue::String(row.sha256),
                ])
            })
            .collect();
        return Ok((0, rows));
    }

    Ok((0, Vec::new()))
}

fn strip<'a>(sql: &'a str, upper: &str, prefix: &str) -> Option<&'a str> {
    if upper.starts_with(prefix) {
        sql.get(prefix.len()..)
    } else {
        None
    }
}

fn object_name(rest: &str) -> String {
    rest.trim_start()
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

fn require_table(state: &FakeState, name: &str) -> Result<(), QueryError> {
    if state.tables.contains(name) {
        Ok(())
    } else {
        Err(undefined_table(name))
    }
}

fn undefined_table(name: &str) -> QueryError {
    postgres_error("42P01", "undefined_table", format!("relation \"{}\" does not exist", name))
}

fn postgres_error(code: &str, name: &str, message: String) -> QueryError {
    QueryError::Postgres {
        code: code.to_string(),
        name: name.to_string(),
        message,
    }
}

fn param_string(statement: &Statement, index: usize) -> Result<String, QueryError> {
    match statement.params.get(index) {
        Some(DatabaseValue::String(s)) => Ok(s.clone()),
        other => Err(QueryError::UnexpectedArgumentType {
            expected: "TEXT".to_string(),
            got: other.map_or("nothing", |v| v.type_name()).to_string(),
        }),
    }
}

fn param_timestamp(statement: &Statement, index: usize) -> Result<NaiveDateTime, QueryError> {
    match statement.params.get(index) {
        Some(DatabaseValue::Timestamp(ts)) => Ok(*ts),
        other => Err(QueryError::UnexpectedArgumentType {
            expected: "TIMESTAMP".to_string(),
            got: other.map_or("nothing", |v| v.type_name()).to_string(),
        }),
    }
}
