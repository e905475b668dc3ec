//! Typed error handling for delivery operations.
//!
//! Transports report a [`TransportError`]; everything else sees it as a
//! [`DeliveryError`], which separates failures worth retrying from those
//! that never will succeed:
//! - Permanent failures (5xx replies) - quarantine, never retry
//! - Temporary failures (4xx replies, network trouble) - retry later
//! - System errors - queue, parse or protocol problems on our side

use courier_common::MessageParseError;
use courier_maildir::QueueError;
use courier_transaction::TransactionError;
use thiserror::Error;

/// Failure reported by a [`Transport`](crate::Transport)
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote side answered with a reply code
    #[error("{code} {message}")]
    Response { code: u16, message: String },

    /// The remote side could not be reached or hung up
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Permanent failure that should not be retried (e.g., 5xx replies).
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure that can be retried (e.g., 4xx replies).
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// Queue, parse or transaction failure on our side.
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Permanent errors that should not be retried.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// The message was rejected by the remote side.
    #[error("Message rejected: {0}")]
    MessageRejected(String),
}

/// Temporary errors that should be retried on a later sweep.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// Failed to reach the remote side.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The remote side returned a temporary failure code.
    #[error("Temporary rejection: {0}")]
    Rejected(String),

    /// The transport failed in a way it could not classify.
    #[error("Transport error: {0}")]
    Unclassified(String),
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// A queued entry could not be parsed back into a message.
    #[error("Unreadable queue entry: {0}")]
    Parse(#[from] MessageParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A reply code outside the 4xx and 5xx ranges.
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl DeliveryError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}

/// Convert what a transport reports into a `DeliveryError`.
///
/// - **4xx replies** → Temporary
/// - **5xx replies** → Permanent
/// - **Other reply codes** → System
/// - **Connection/I/O/unclassified errors** → Temporary
impl From<TransportError> for DeliveryError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Response { code, message } if (400..500).contains(&code) => {
                Self::Temporary(TemporaryError::Rejected(format!("{code} {message}")))
            }
            TransportError::Response { code, message } if (500..600).contains(&code) => {
                Self::Permanent(PermanentError::MessageRejected(format!("{code} {message}")))
            }
            TransportError::Response { code, message } => {
                Self::System(SystemError::UnexpectedReply(format!("{code} {message}")))
            }
            TransportError::Connection(msg) => {
                Self::Temporary(TemporaryError::ConnectionFailed(msg))
            }
            TransportError::Io(e) => {
                Self::Temporary(TemporaryError::ConnectionFailed(format!("I/O error: {e}")))
            }
            TransportError::Other(msg) => Self::Temporary(TemporaryError::Unclassified(msg)),
        }
    }
}

impl From<QueueError> for DeliveryError {
    fn from(error: QueueError) -> Self {
        Self::System(SystemError::Queue(error))
    }
}

impl From<TransactionError> for DeliveryError {
    fn from(error: TransactionError) -> Self {
        Self::System(SystemError::Transaction(error))
    }
}

impl From<MessageParseError> for DeliveryError {
    fn from(error: MessageParseError) -> Self {
        Self::System(SystemError::Parse(error))
    }
}

impl From<std::io::Error> for DeliveryError {
    fn from(error: std::io::Error) -> Self {
        Self::System(SystemError::Io(error))
    }
}
