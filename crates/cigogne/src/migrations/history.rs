//! Applied-migration history
//!
//! Only identity and hash are persisted, so migrations read back from the
//! tracking table have empty statement lists. Callers that need the
//! statements match history entries against their own definitions.

use super::definitions::Migration;
use crate::backends::{DatabaseRow, Statement};
use crate::database::Database;
use crate::error::{MigrateResult, QueryError};

/// A migration whose stored hash no longer matches its definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMismatch {
    pub full_name: String,
    pub defined_hash: String,
    pub applied_hash: String,
}

impl Database {
    /// Applied migrations in the order they were applied
    pub async fn get_applied_migrations(&self) -> MigrateResult<Vec<Migration>> {
        let mut session = self.backend().acquire().await?;
        let rows = session.fetch_all(&self.applied_migrations_statement()).await?;

        let migrations = rows
            .iter()
            .map(row_to_migration)
            .collect::<Result<Vec<_>, QueryError>>()?;

        tracing::debug!(
            "Read {} applied migrations from {}",
            migrations.len(),
            self.qualified_table()
        );
        Ok(migrations)
    }

    /// SQL to get applied migrations
    pub(crate) fn applied_migrations_statement(&self) -> Statement {
        Statement::new(format!(
            "SELECT createdAt, name, sha256 FROM {} ORDER BY appliedAt ASC",
            self.qualified_table()
        ))
    }
}

fn row_to_migration(row: &DatabaseRow) -> Result<Migration, QueryError> {
    Ok(Migration::new(
        row.get_string(1)?,
        row.get_timestamp(0)?,
        Vec::new(),
        Vec::new(),
        row.get_string(2)?,
    ))
}

/// Candidates with no history entry of the same name and timestamp,
/// in candidate order
pub fn find_unapplied<'a>(candidates: &'a [Migration], applied: &[Migration]) -> Vec<&'a Migration> {
    candidates
        .iter()
        .filter(|candidate| !applied.iter().any(|done| done.same_identity(candidate)))
        .collect()
}

/// Applied migrations whose current definition hashes differently
pub fn find_hash_mismatches(candidates: &[Migration], applied: &[Migration]) -> Vec<HashMismatch> {
    candidates
        .iter()
        .filter_map(|candidate| {
            let done = applied.iter().find(|done| done.same_identity(candidate))?;
            (done.content_hash != candidate.content_hash).then(|| HashMismatch {
                full_name: candidate.full_name(),
                defined_hash: candidate.content_hash.clone(),
                applied_hash: done.content_hash.clone(),
            })
        })
        .collect()
}
