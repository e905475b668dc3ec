use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use courier_common::internal;
use futures_util::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;

use crate::{
    ResourceManager, Savepoint, Transaction, TransactionHandle,
    error::{ActionKind, BoxError, TransactionError},
};

static NEXT_SORT_KEY: AtomicU64 = AtomicU64::new(1);

/// A deferred side effect run by the participant at most once
pub type Action = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// Where a participant is in the two-phase commit sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    None,
    Begun,
    Voted,
    Finished,
    RolledBack,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "NONE",
            Self::Begun => "BEGUN",
            Self::Voted => "VOTED",
            Self::Finished => "FINISHED",
            Self::RolledBack => "ROLLED_BACK",
        })
    }
}

struct State {
    phase: Phase,
    bound: Option<TransactionHandle>,
    commit: Option<Action>,
    abort: Option<Action>,
}

impl State {
    fn check_bound(
        &self,
        operation: &'static str,
        transaction: TransactionHandle,
    ) -> Result<(), TransactionError> {
        match self.bound {
            None => Err(TransactionError::not_bound(operation)),
            Some(bound) if bound != transaction => Err(TransactionError::wrong_transaction(
                operation,
                bound,
                transaction,
            )),
            Some(_) => Ok(()),
        }
    }

    /// Move to `to` if bound to `transaction` and in one of the `from` phases
    fn advance(
        &mut self,
        operation: &'static str,
        transaction: TransactionHandle,
        from: &[Phase],
        to: Phase,
    ) -> Result<(), TransactionError> {
        self.check_bound(operation, transaction)?;

        if !from.contains(&self.phase) {
            return Err(TransactionError::out_of_sequence(operation, self.phase));
        }

        self.phase = to;
        Ok(())
    }
}

/// A resource manager whose only side effect is one mail action.
///
/// The commit action runs during `finish`, the abort action during
/// `rollback` or `simple_abort`. Neither runs more than once, and once one
/// of them has been started the other is dropped. A participant joins at
/// most one transaction for its whole life.
pub struct MailParticipant {
    sort_key: u64,
    state: Mutex<State>,
}

impl fmt::Debug for MailParticipant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MailParticipant")
            .field("sort_key", &self.sort_key)
            .field("phase", &state.phase)
            .field("bound", &state.bound)
            .finish_non_exhaustive()
    }
}

impl MailParticipant {
    /// Create a detached participant that runs `commit` when its
    /// transaction finishes
    pub fn new<F, Fut>(commit: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            sort_key: NEXT_SORT_KEY.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(State {
                phase: Phase::None,
                bound: None,
                commit: Some(Box::new(move || commit().boxed())),
                abort: None,
            }),
        }
    }

    /// Run `abort` if the transaction is rolled back or aborted
    #[must_use]
    pub fn on_abort<F, Fut>(self, abort: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.state.lock().abort = Some(Box::new(move || abort().boxed()));
        self
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// The transaction this participant belongs to, if any
    pub fn transaction(&self) -> Option<TransactionHandle> {
        self.state.lock().bound
    }

    /// Bind to `transaction` and enlist with it
    ///
    /// # Errors
    /// [`TransactionError::CrossTransaction`] if already bound elsewhere, or
    /// whatever the transaction reports when joining
    pub fn join_transaction(
        self: &Arc<Self>,
        transaction: &dyn Transaction,
    ) -> Result<(), TransactionError> {
        self.bind(transaction.handle())?;
        transaction.join(Arc::clone(self) as Arc<dyn ResourceManager>)
    }

    async fn run(kind: ActionKind, action: Option<Action>) -> Result<(), TransactionError> {
        let Some(action) = action else {
            return Ok(());
        };

        action().await.map_err(|source| {
            tracing::error!(action = %kind, error = %source, "Transaction action failed");
            TransactionError::Action { kind, source }
        })
    }
}

#[async_trait]
impl ResourceManager for MailParticipant {
    fn sort_key(&self) -> u64 {
        self.sort_key
    }

    fn bind(&self, transaction: TransactionHandle) -> Result<(), TransactionError> {
        let mut state = self.state.lock();

        match state.bound {
            Some(bound) if bound != transaction => Err(TransactionError::CrossTransaction {
                bound,
                requested: transaction,
            }),
            Some(_) => Ok(()),
            None => {
                internal!("Participant {} joined {transaction}", self.sort_key);
                state.bound = Some(transaction);
                Ok(())
            }
        }
    }

    async fn begin_prepare(&self, transaction: TransactionHandle) -> Result<(), TransactionError> {
        self.state
            .lock()
            .advance("begin_prepare", transaction, &[Phase::None], Phase::Begun)
    }

    async fn vote(&self, transaction: TransactionHandle) -> Result<(), TransactionError> {
        self.state
            .lock()
            .advance("vote", transaction, &[Phase::Begun], Phase::Voted)
    }

    async fn finish(&self, transaction: TransactionHandle) -> Result<(), TransactionError> {
        let commit = {
            let mut state = self.state.lock();
            state.advance("finish", transaction, &[Phase::Voted], Phase::Finished)?;
            state.abort = None;
            state.commit.take()
        };

        Self::run(ActionKind::Commit, commit).await
    }

    async fn rollback(&self, transaction: TransactionHandle) -> Result<(), TransactionError> {
        let abort = {
            let mut state = self.state.lock();
            state.advance(
                "rollback",
                transaction,
                &[Phase::Begun, Phase::Voted],
                Phase::RolledBack,
            )?;
            state.commit = None;
            state.abort.take()
        };

        Self::run(ActionKind::Abort, abort).await
    }

    async fn simple_abort(&self, transaction: TransactionHandle) -> Result<(), TransactionError> {
        let abort = {
            let mut state = self.state.lock();
            state.advance(
                "simple_abort",
                transaction,
                &[Phase::None],
                Phase::RolledBack,
            )?;
            state.commit = None;
            state.abort.take()
        };

        Self::run(ActionKind::Abort, abort).await
    }

    fn create_savepoint(&self) -> Result<Savepoint, TransactionError> {
        self.state
            .lock()
            .bound
            .map(Savepoint::new)
            .ok_or_else(|| TransactionError::not_bound("create_savepoint"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting() -> (Arc<AtomicUsize>, Arc<AtomicUsize>, MailParticipant) {
        let commits = Arc::new(AtomicUsize::new(0));
        let aborts = Arc::new(AtomicUsize::new(0));
        let (c, a) = (Arc::clone(&commits), Arc::clone(&aborts));

        let participant = MailParticipant::new(move || async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .on_abort(move || async move {
            a.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        (commits, aborts, participant)
    }

    #[tokio::test]
    async fn test_full_sequence_commits_once() {
        let (commits, aborts, participant) = counting();
        let tx = TransactionHandle::new();

        participant.bind(tx).unwrap();
        participant.begin_prepare(tx).await.unwrap();
        participant.vote(tx).await.unwrap();
        participant.finish(tx).await.unwrap();

        assert_eq!(participant.phase(), Phase::Finished);
        assert_eq!(commits.load(Ordering::SeqCst), 1);

        let err = participant.finish(tx).await.unwrap_err();
        assert!(err.is_protocol());
        assert_eq!(commits.load(Ordering::SeqCst), 1);
        assert_eq!(aborts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_steps_cannot_be_skipped() {
        let (commits, _, participant) = counting();
        let tx = TransactionHandle::new();
        participant.bind(tx).unwrap();

        assert!(participant.vote(tx).await.unwrap_err().is_protocol());
        assert!(participant.finish(tx).await.unwrap_err().is_protocol());

        participant.begin_prepare(tx).await.unwrap();
        assert!(participant.begin_prepare(tx).await.unwrap_err().is_protocol());
        assert!(participant.finish(tx).await.unwrap_err().is_protocol());
        assert_eq!(participant.phase(), Phase::Begun);
        assert_eq!(commits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unbound_participant_rejects_protocol_calls() {
        let (_, aborts, participant) = counting();
        let tx = TransactionHandle::new();

        assert!(participant.begin_prepare(tx).await.unwrap_err().is_protocol());
        assert!(participant.simple_abort(tx).await.unwrap_err().is_protocol());
        assert!(participant.create_savepoint().unwrap_err().is_protocol());
        assert_eq!(aborts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_calls_for_another_transaction_are_rejected() {
        let (_, _, participant) = counting();
        let tx = TransactionHandle::new();
        participant.bind(tx).unwrap();

        let err = participant
            .begin_prepare(TransactionHandle::new())
            .await
            .unwrap_err();
        assert!(err.is_protocol());
        assert_eq!(participant.phase(), Phase::None);
    }

    #[tokio::test]
    async fn test_rollback_after_vote_runs_abort() {
        let (commits, aborts, participant) = counting();
        let tx = TransactionHandle::new();
        participant.bind(tx).unwrap();
        participant.begin_prepare(tx).await.unwrap();
        participant.vote(tx).await.unwrap();

        participant.rollback(tx).await.unwrap();

        assert_eq!(participant.phase(), Phase::RolledBack);
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
        assert!(participant.finish(tx).await.unwrap_err().is_protocol());
        assert!(participant.rollback(tx).await.unwrap_err().is_protocol());
        assert_eq!(commits.load(Ordering::SeqCst), 0);
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rollback_requires_an_active_sequence() {
        let (_, aborts, participant) = counting();
        let tx = TransactionHandle::new();
        participant.bind(tx).unwrap();

        assert!(participant.rollback(tx).await.unwrap_err().is_protocol());

        participant.begin_prepare(tx).await.unwrap();
        participant.vote(tx).await.unwrap();
        participant.finish(tx).await.unwrap();
        assert!(participant.rollback(tx).await.unwrap_err().is_protocol());
        assert_eq!(aborts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_simple_abort_only_before_prepare() {
        let (commits, aborts, participant) = counting();
        let tx = TransactionHandle::new();
        participant.bind(tx).unwrap();

        participant.simple_abort(tx).await.unwrap();
        assert_eq!(participant.phase(), Phase::RolledBack);
        assert_eq!(aborts.load(Ordering::SeqCst), 1);

        assert!(participant.simple_abort(tx).await.unwrap_err().is_protocol());
        assert!(participant.begin_prepare(tx).await.unwrap_err().is_protocol());
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
        assert_eq!(commits.load(Ordering::SeqCst), 0);

        let (_, aborts, prepared) = counting();
        prepared.bind(tx).unwrap();
        prepared.begin_prepare(tx).await.unwrap();
        assert!(prepared.simple_abort(tx).await.unwrap_err().is_protocol());
        assert_eq!(aborts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_bind_to_another_transaction_changes_nothing() {
        let (_, _, participant) = counting();
        let first = TransactionHandle::new();
        let second = TransactionHandle::new();

        participant.bind(first).unwrap();
        participant.bind(first).unwrap();

        let err = participant.bind(second).unwrap_err();
        assert!(err.is_cross_transaction());
        assert_eq!(participant.transaction(), Some(first));
        assert_eq!(participant.phase(), Phase::None);
    }

    #[tokio::test]
    async fn test_failed_commit_still_finishes() {
        let participant = MailParticipant::new(|| async { Err("relay refused".into()) });
        let tx = TransactionHandle::new();
        participant.bind(tx).unwrap();
        participant.begin_prepare(tx).await.unwrap();
        participant.vote(tx).await.unwrap();

        let err = participant.finish(tx).await.unwrap_err();

        assert!(matches!(
            err,
            TransactionError::Action {
                kind: ActionKind::Commit,
                ..
            }
        ));
        assert_eq!(participant.phase(), Phase::Finished);
    }

    #[test]
    fn test_savepoint_is_tied_to_the_transaction() {
        let (_, _, participant) = counting();
        let tx = TransactionHandle::new();
        participant.bind(tx).unwrap();

        let savepoint = participant.create_savepoint().unwrap();
        savepoint.rollback();

        assert_eq!(savepoint.transaction(), tx);
        assert_eq!(participant.phase(), Phase::None);
    }

    #[test]
    fn test_sort_keys_are_unique() {
        let (_, _, a) = counting();
        let (_, _, b) = counting();
        assert_ne!(a.sort_key(), b.sort_key());
    }
}
