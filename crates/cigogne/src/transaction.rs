//! Transaction Management
//!
//! Scoped transactions: the body runs against one transaction, which is
//! committed when the body returns `Ok` and rolled back when it returns
//! `Err`. A rolled-back body error comes back wrapped in
//! [`TransactionError::RolledBack`].

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::backends::{DatabaseExecutor, DatabaseTransaction};
use crate::database::Database;
use crate::error::{MigrateError, MigrateResult, TransactionError};

/// Boxed future returned by transaction bodies
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

impl Database {
    /// Run `body` inside a single transaction.
    ///
    /// The body borrows the transaction for the duration of its future, so
    /// anything else it uses must be moved in:
    ///
    /// ```no_run
    /// # use cigogne::{Database, Statement, MigrateResult};
    /// # async fn run(db: &Database) -> MigrateResult<()> {
    /// let audit = Statement::new("INSERT INTO audit (event) VALUES ($1)").bind("seeded");
    /// db.transaction(move |tx| {
    ///     Box::pin(async move {
    ///         tx.execute(&Statement::new("UPDATE users SET active = true")).await?;
    ///         tx.execute(&audit).await?;
    ///         Ok(())
    ///     })
    /// })
    /// .await
    /// # }
    /// ```
    pub async fn transaction<T, F>(&self, body: F) -> MigrateResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut dyn DatabaseExecutor) -> BoxFuture<'t, MigrateResult<T>> + Send,
    {
        let mut tx = begin_transaction(self).await?;
        let outcome = body(tx.as_executor()).await;
        finish_transaction(tx, outcome).await
    }
}

/// Begin a transaction on the handle's backend
pub(crate) async fn begin_transaction(db: &Database) -> MigrateResult<Box<dyn DatabaseTransaction>> {
    debug!("Beginning transaction");
    db.backend()
        .begin()
        .await
        .map_err(|e| MigrateError::Transaction(TransactionError::Query(e)))
}

/// Commit on success, roll back on failure
pub(crate) async fn finish_transaction<T>(
    tx: Box<dyn DatabaseTransaction>,
    outcome: MigrateResult<T>,
) -> MigrateResult<T> {
    match outcome {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| MigrateError::Transaction(TransactionError::Query(e)))?;
            debug!("Transaction committed successfully");
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                // the server discards the transaction when the connection drops
                warn!("Explicit rollback failed: {}", rollback_err);
            }
            debug!("Transaction rolled back: {}", err);
            Err(MigrateError::rolled_back(err))
        }
    }
}
