//! Error types for the courier-common crate.

use thiserror::Error;

/// Errors raised while reading the header section of a stored message.
#[derive(Debug, Error)]
pub enum MessageParseError {
    /// A header field could not be parsed.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

impl From<mailparse::MailParseError> for MessageParseError {
    fn from(error: mailparse::MailParseError) -> Self {
        Self::InvalidHeader(error.to_string())
    }
}
