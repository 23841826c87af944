//! Database Backend Abstractions
//!
//! The migration engine only needs to run statements, fetch rows and scope
//! work in a transaction. `core` defines that seam; `postgres` implements it
//! with sqlx.

pub mod core;
pub mod postgres;

pub use self::core::*;
pub use postgres::PostgresPool;
