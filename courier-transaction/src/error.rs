use thiserror::Error;

use crate::{Phase, TransactionHandle};

/// Error type produced by commit and abort actions
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which side effect an [`TransactionError::Action`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Commit,
    Abort,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Commit => "commit",
            Self::Abort => "abort",
        })
    }
}

/// Errors raised by a transaction participant
#[derive(Debug, Error)]
pub enum TransactionError {
    /// A resource manager method was called out of sequence, or for a
    /// transaction the participant does not belong to
    #[error("{operation} is not allowed: {reason}")]
    Protocol {
        operation: &'static str,
        reason: String,
    },

    /// The participant is already bound to another transaction
    #[error("Participant is bound to transaction {bound} and cannot join {requested}")]
    CrossTransaction {
        bound: TransactionHandle,
        requested: TransactionHandle,
    },

    /// The commit or abort side effect failed
    #[error("{kind} action failed: {source}")]
    Action {
        kind: ActionKind,
        #[source]
        source: BoxError,
    },
}

impl TransactionError {
    pub(crate) fn out_of_sequence(operation: &'static str, phase: Phase) -> Self {
        Self::Protocol {
            operation,
            reason: format!("participant is in phase {phase}"),
        }
    }

    pub(crate) fn not_bound(operation: &'static str) -> Self {
        Self::Protocol {
            operation,
            reason: "participant has not joined a transaction".to_string(),
        }
    }

    pub(crate) fn wrong_transaction(
        operation: &'static str,
        bound: TransactionHandle,
        requested: TransactionHandle,
    ) -> Self {
        Self::Protocol {
            operation,
            reason: format!("participant belongs to {bound}, not {requested}"),
        }
    }

    /// A coordinator or participant bug; never worth retrying
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    #[must_use]
    pub const fn is_cross_transaction(&self) -> bool {
        matches!(self, Self::CrossTransaction { .. })
    }

    /// The side effect itself failed
    #[must_use]
    pub const fn is_action(&self) -> bool {
        matches!(self, Self::Action { .. })
    }
}
