use std::{io, sync::Arc, time::Duration};

use courier_common::{Envelope, envelope, internal};
use courier_maildir::{
    ClaimOutcome, ClaimState, EntryRef, Maildir,
    claim::{acquire_claim, break_claim, claim_state, release_claim, touch},
};

use crate::{
    DeliveryError, Transport,
    report::{EntryOutcome, SkipReason, SweepReport},
};

/// A claim left this long is assumed to belong to a worker that died
pub const DEFAULT_STALE_CLAIM: Duration = Duration::from_secs(3 * 60 * 60);

/// Drains a maildir queue through a transport.
///
/// Any number of workers, in this or other processes, may sweep the same
/// queue; claim markers make sure each entry is sent by one of them. An
/// entry whose send failed temporarily keeps its claim, which doubles as
/// the retry delay: it is tried again once the claim goes stale.
pub struct QueueWorker {
    maildir: Maildir,
    transport: Arc<dyn Transport>,
    stale_after: Duration,
}

impl std::fmt::Debug for QueueWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueWorker")
            .field("maildir", &self.maildir)
            .field("stale_after", &self.stale_after)
            .finish_non_exhaustive()
    }
}

impl QueueWorker {
    pub fn new(maildir: Maildir, transport: Arc<dyn Transport>) -> Self {
        Self {
            maildir,
            transport,
            stale_after: DEFAULT_STALE_CLAIM,
        }
    }

    /// Set how old a claim marker must be before it is broken
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub const fn maildir(&self) -> &Maildir {
        &self.maildir
    }

    pub const fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Attempt every published entry once, oldest first.
    ///
    /// Failures of individual entries are recorded in the report and never
    /// stop the sweep.
    ///
    /// # Errors
    /// If the queue cannot be listed
    pub async fn sweep(&self) -> Result<SweepReport, DeliveryError> {
        self.sweep_with_stale_after(self.stale_after).await
    }

    /// Like [`sweep`](Self::sweep), breaking claims older than `stale_after`
    /// instead of the worker's own setting
    ///
    /// # Errors
    /// If the queue cannot be listed
    #[tracing::instrument(skip_all, fields(maildir = %self.maildir.path().display()))]
    pub async fn sweep_with_stale_after(
        &self,
        stale_after: Duration,
    ) -> Result<SweepReport, DeliveryError> {
        let entries = self.maildir.list_published().await?;
        let mut report = SweepReport::default();

        for entry in entries {
            let outcome = self.attempt(&entry, stale_after).await;
            report.record(entry.name, outcome);
        }

        Ok(report)
    }

    /// Claim, send and retire a single entry
    pub async fn process_entry(&self, entry: &EntryRef) -> EntryOutcome {
        self.attempt(entry, self.stale_after).await
    }

    #[tracing::instrument(skip_all, fields(entry = %entry.name))]
    async fn attempt(&self, entry: &EntryRef, stale_after: Duration) -> EntryOutcome {
        match self.try_process(entry, stale_after).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "Error while processing queued mail");
                EntryOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn try_process(
        &self,
        entry: &EntryRef,
        stale_after: Duration,
    ) -> Result<EntryOutcome, DeliveryError> {
        match claim_state(entry, stale_after).await? {
            ClaimState::Free => {}
            ClaimState::Held { age } => {
                tracing::debug!(age_secs = age.as_secs(), "Entry is claimed by another worker");
                return Ok(EntryOutcome::Skipped(SkipReason::ClaimHeld));
            }
            ClaimState::Stale { age } => {
                if break_claim(entry).await? {
                    tracing::info!(
                        age_secs = age.as_secs(),
                        "Recovered stale claim, retrying entry"
                    );
                }
            }
        }

        match touch(&entry.path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(EntryOutcome::Skipped(SkipReason::Gone));
            }
            Err(err) => return Err(err.into()),
        }

        match acquire_claim(entry).await? {
            ClaimOutcome::Acquired => {}
            ClaimOutcome::Contended => {
                tracing::debug!("Lost the race to claim entry");
                return Ok(EntryOutcome::Skipped(SkipReason::Contended));
            }
            ClaimOutcome::Gone => return Ok(EntryOutcome::Skipped(SkipReason::Gone)),
        }

        let raw = self.maildir.read_entry(entry).await?;
        let (envelope, data) = envelope::extract(&raw)?;

        match self
            .transport
            .send(&envelope.sender, &envelope.recipients, &data)
            .await
        {
            Ok(()) => {
                self.maildir.remove_entry(entry).await?;
                release_claim(entry).await?;
                tracing::info!(
                    from = %envelope.sender,
                    to = ?envelope.recipients,
                    "Mail sent"
                );
                Ok(EntryOutcome::Delivered)
            }
            Err(err) => {
                self.handle_failure(entry, &envelope, err.into(), stale_after)
                    .await
            }
        }
    }

    async fn handle_failure(
        &self,
        entry: &EntryRef,
        envelope: &Envelope,
        err: DeliveryError,
        stale_after: Duration,
    ) -> Result<EntryOutcome, DeliveryError> {
        let reason = err.to_string();

        if err.is_permanent() {
            self.maildir.quarantine_entry(entry).await?;
            release_claim(entry).await?;
            tracing::error!(
                from = %envelope.sender,
                to = ?envelope.recipients,
                reason = %reason,
                "Discarding mail rejected by the transport"
            );
            return Ok(EntryOutcome::Quarantined { reason });
        }

        tracing::warn!(
            from = %envelope.sender,
            to = ?envelope.recipients,
            reason = %reason,
            "Mail not sent, will retry"
        );
        internal!(
            "Claim on {} kept until it is older than {:?}",
            entry.name,
            stale_after
        );
        Ok(EntryOutcome::Deferred { reason })
    }
}
