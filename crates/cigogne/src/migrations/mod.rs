//! Migration System
//!
//! Definitions, tracking-table bootstrap, the execution engine and the
//! history reader. Operations are methods on [`crate::Database`].

pub mod definitions;
pub mod history;
pub mod runner;
pub mod table;

pub use definitions::*;
pub use history::{find_hash_mismatches, find_unapplied, HashMismatch};
pub use table::{ZERO_MIGRATION_HASH, ZERO_MIGRATION_NAME};
