//! A minimal coordinator for driving resource managers in tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{ResourceManager, Transaction, TransactionError, TransactionHandle};

/// In-process transaction that drives its joined managers through two-phase
/// commit in sort key order
#[derive(Default)]
pub struct TestTransaction {
    handle: TransactionHandle,
    managers: Mutex<Vec<Arc<dyn ResourceManager>>>,
}

impl std::fmt::Debug for TestTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestTransaction")
            .field("handle", &self.handle)
            .field("participants", &self.participants())
            .finish()
    }
}

impl TestTransaction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of joined managers
    pub fn participants(&self) -> usize {
        self.managers.lock().len()
    }

    fn ordered(&self) -> Vec<Arc<dyn ResourceManager>> {
        let mut managers = self.managers.lock().clone();
        managers.sort_by_key(|manager| manager.sort_key());
        managers
    }

    /// Prepare, vote and finish every manager.
    ///
    /// A failure while preparing or voting aborts every manager: those that
    /// began preparing are rolled back, the rest are aborted before they
    /// ever started. Once finishing starts every manager is finished, and
    /// the first error is returned.
    ///
    /// # Errors
    /// The first error any manager reported
    pub async fn commit(&self) -> Result<(), TransactionError> {
        let managers = self.ordered();

        for (prepared, manager) in managers.iter().enumerate() {
            if let Err(err) = manager.begin_prepare(self.handle).await {
                self.abort_from(&managers, prepared).await;
                return Err(err);
            }
        }

        for manager in &managers {
            if let Err(err) = manager.vote(self.handle).await {
                self.abort_from(&managers, managers.len()).await;
                return Err(err);
            }
        }

        let mut first_error = None;
        for manager in &managers {
            if let Err(err) = manager.finish(self.handle).await {
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Abort before any preparation took place
    ///
    /// # Errors
    /// The first error any manager reported
    pub async fn abort(&self) -> Result<(), TransactionError> {
        let mut first_error = None;
        for manager in self.ordered() {
            if let Err(err) = manager.simple_abort(self.handle).await {
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Roll back the first `prepared` managers and simply abort the others.
    ///
    /// The manager at `prepared` is the one that failed to prepare; its
    /// phase is unknown, so it is rolled back if it got that far and simply
    /// aborted otherwise.
    async fn abort_from(&self, managers: &[Arc<dyn ResourceManager>], prepared: usize) {
        for (index, manager) in managers.iter().enumerate() {
            let result = if index < prepared {
                manager.rollback(self.handle).await
            } else if index == prepared {
                match manager.rollback(self.handle).await {
                    Err(err) if err.is_protocol() => manager.simple_abort(self.handle).await,
                    other => other,
                }
            } else {
                manager.simple_abort(self.handle).await
            };

            if let Err(err) = result {
                tracing::debug!(error = %err, "Abort skipped");
            }
        }
    }
}

impl Transaction for TestTransaction {
    fn handle(&self) -> TransactionHandle {
        self.handle
    }

    fn join(&self, manager: Arc<dyn ResourceManager>) -> Result<(), TransactionError> {
        let mut managers = self.managers.lock();
        if !managers
            .iter()
            .any(|joined| joined.sort_key() == manager.sort_key())
        {
            managers.push(manager);
        }
        Ok(())
    }
}
