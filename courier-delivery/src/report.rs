use courier_maildir::EntryName;

/// Why an entry was left alone during a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another worker holds a fresh claim
    ClaimHeld,
    /// Another worker claimed the entry first
    Contended,
    /// The entry disappeared before it could be claimed
    Gone,
}

/// What happened to one queue entry during a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Sent and removed from the queue
    Delivered,
    /// Temporarily rejected; retried once the claim goes stale
    Deferred { reason: String },
    /// Permanently rejected and moved aside
    Quarantined { reason: String },
    Skipped(SkipReason),
    /// Could not be processed; the claim is kept so it is retried later
    Failed { reason: String },
}

/// Everything a single sweep did, in the order entries were attempted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub entries: Vec<(EntryName, EntryOutcome)>,
    pub delivered: usize,
    pub deferred: usize,
    pub quarantined: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SweepReport {
    pub(crate) fn record(&mut self, name: EntryName, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Delivered => self.delivered += 1,
            EntryOutcome::Deferred { .. } => self.deferred += 1,
            EntryOutcome::Quarantined { .. } => self.quarantined += 1,
            EntryOutcome::Skipped(_) => self.skipped += 1,
            EntryOutcome::Failed { .. } => self.failed += 1,
        }
        self.entries.push((name, outcome));
    }

    /// Number of entries the sweep looked at
    #[must_use]
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The outcome recorded for `name`, if the sweep saw it
    #[must_use]
    pub fn outcome(&self, name: &EntryName) -> Option<&EntryOutcome> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, outcome)| outcome)
    }
}
