use std::sync::Arc;

use async_trait::async_trait;

use crate::{Savepoint, TransactionError, TransactionHandle};

/// The interface a two-phase commit coordinator drives.
///
/// A coordinator calls `begin_prepare`, `vote` and `finish` in that order
/// on every joined resource manager, or `rollback` once preparation has
/// started. `simple_abort` discards the work before preparation begins.
/// Every call names the transaction it is made for.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Stable key a coordinator orders joined managers by
    fn sort_key(&self) -> u64;

    /// Associate this manager with `transaction`
    ///
    /// # Errors
    /// [`TransactionError::CrossTransaction`] if bound to another transaction
    fn bind(&self, transaction: TransactionHandle) -> Result<(), TransactionError>;

    async fn begin_prepare(&self, transaction: TransactionHandle) -> Result<(), TransactionError>;

    async fn vote(&self, transaction: TransactionHandle) -> Result<(), TransactionError>;

    async fn finish(&self, transaction: TransactionHandle) -> Result<(), TransactionError>;

    async fn rollback(&self, transaction: TransactionHandle) -> Result<(), TransactionError>;

    async fn simple_abort(&self, transaction: TransactionHandle) -> Result<(), TransactionError>;

    /// # Errors
    /// [`TransactionError::Protocol`] if the manager has not joined a transaction
    fn create_savepoint(&self) -> Result<Savepoint, TransactionError>;
}

/// A unit of work resource managers can join
pub trait Transaction: Send + Sync {
    fn handle(&self) -> TransactionHandle;

    /// Enlist `manager` so the coordinator drives it on commit or abort
    ///
    /// # Errors
    /// If the transaction no longer accepts participants
    fn join(&self, manager: Arc<dyn ResourceManager>) -> Result<(), TransactionError>;
}
