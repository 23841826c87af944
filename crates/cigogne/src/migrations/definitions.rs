//! Migration Definitions - Core types for the migration engine
//!
//! A [`Migration`] is built by whatever discovers migration files; the
//! engine only reads it.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp layout used in migration full names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Represents a database migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Human-readable name, unique within a run
    pub name: String,
    /// Logical timestamp used as the ordering key
    pub created_at: NaiveDateTime,
    /// Statements executed, in order, when applying
    pub queries_up: Vec<String>,
    /// Statements executed, in order, when rolling back
    pub queries_down: Vec<String>,
    /// Opaque hash of the migration content
    pub content_hash: String,
}

impl Migration {
    pub fn new(
        name: impl Into<String>,
        created_at: NaiveDateTime,
        queries_up: Vec<String>,
        queries_down: Vec<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            created_at,
            queries_up,
            queries_down,
            content_hash: content_hash.into(),
        }
    }

    /// `YYYYMMDDHHMMSS-name`
    pub fn full_name(&self) -> String {
        format!("{}-{}", self.created_at.format(TIMESTAMP_FORMAT), self.name)
    }

    /// Whether `other` refers to the same migration (name and timestamp)
    pub fn same_identity(&self, other: &Migration) -> bool {
        self.name == other.name && self.created_at == other.created_at
    }
}

/// Result of applying a sequence of migrations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRunResult {
    /// Number of migrations that were applied
    pub applied_count: usize,
    /// Full names of the applied migrations, in order
    pub applied_migrations: Vec<String>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    /// Apply the migration (run UP statements)
    Up,
    /// Rollback the migration (run DOWN statements)
    Down,
}

impl MigrationDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationDirection::Up => "apply",
            MigrationDirection::Down => "rollback",
        }
    }
}
