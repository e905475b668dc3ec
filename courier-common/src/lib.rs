//! Types shared by every courier crate: the outbound [`Message`], the
//! envelope headers that travel with a queued message, header scanning and
//! the logging setup.

pub mod envelope;
pub mod error;
pub mod host;
pub mod logging;
pub mod message;

pub use envelope::Envelope;
pub use error::MessageParseError;
pub use message::{Message, prepare_envelope};
pub use tracing;

/// Lifecycle signal broadcast to long running services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
