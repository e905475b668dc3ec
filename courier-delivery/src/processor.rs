//! Periodic queue sweeping

use std::time::Duration;

use courier_common::{Signal, internal};
use serde::Deserialize;
use tokio::{sync::broadcast, time::MissedTickBehavior};

use crate::{DeliveryError, QueueWorker, SweepReport, worker::DEFAULT_STALE_CLAIM};

const fn default_interval() -> u64 {
    3
}

const fn default_stale_claim() -> u64 {
    DEFAULT_STALE_CLAIM.as_secs()
}

const fn default_purge_orphans() -> bool {
    true
}

/// Runs a [`QueueWorker`] at a fixed interval until told to stop.
///
/// ```ron
/// (
///     interval_secs: 3,
///     stale_claim_secs: 10800,
///     purge_orphans: true,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueProcessor {
    /// Pause between the start of two sweeps (in seconds)
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Age after which another worker's claim is broken (in seconds)
    #[serde(default = "default_stale_claim")]
    pub stale_claim_secs: u64,

    /// Remove orphaned staged files before each sweep
    #[serde(default = "default_purge_orphans")]
    pub purge_orphans: bool,
}

impl Default for QueueProcessor {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            stale_claim_secs: default_stale_claim(),
            purge_orphans: default_purge_orphans(),
        }
    }
}

impl QueueProcessor {
    /// Never shorter than a second
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    #[must_use]
    pub const fn stale_claim(&self) -> Duration {
        Duration::from_secs(self.stale_claim_secs)
    }

    /// Purge orphans if enabled, then sweep once.
    ///
    /// Claims are judged stale by `stale_claim_secs`, whatever the worker
    /// was built with.
    ///
    /// # Errors
    /// If the queue cannot be listed
    pub async fn run_once(&self, worker: &QueueWorker) -> Result<SweepReport, DeliveryError> {
        if self.purge_orphans {
            let maildir = worker.maildir();
            if let Err(err) = maildir.purge_orphans(maildir.orphan_max_age()).await {
                tracing::warn!(error = %err, "Unable to purge orphaned staged files");
            }
        }

        let report = worker.sweep_with_stale_after(self.stale_claim()).await?;

        if report.is_empty() {
            tracing::debug!("Queue is empty");
        } else {
            tracing::info!(
                delivered = report.delivered,
                deferred = report.deferred,
                quarantined = report.quarantined,
                skipped = report.skipped,
                failed = report.failed,
                "Swept queue"
            );
        }

        Ok(report)
    }

    /// Sweep the queue every `interval_secs` until a shutdown signal arrives.
    ///
    /// The first sweep starts immediately. A sweep in progress when the
    /// signal arrives runs to completion before this returns.
    ///
    /// # Errors
    /// Currently never; sweep errors are logged and the loop carries on
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn serve(
        &self,
        worker: &QueueWorker,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), DeliveryError> {
        internal!("Queue processor starting");

        let mut timer = tokio::time::interval(self.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Queue processor received shutdown signal");
                            break;
                        }
                        Err(e) => {
                            tracing::error!("Queue processor shutdown channel error: {e}");
                            break;
                        }
                    }
                }
                _ = timer.tick() => {
                    if let Err(e) = self.run_once(worker).await {
                        tracing::error!("Error sweeping queue: {e}");
                    }
                }
            }
        }

        internal!("Queue processor shutdown complete");
        Ok(())
    }
}
