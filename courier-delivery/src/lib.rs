//! Transactional mail delivery.
//!
//! [`DirectDelivery`] and [`QueuedDelivery`] join a transaction and only
//! send, or publish to the queue, when it commits. [`QueueWorker`] drains
//! the queue through a [`Transport`], and [`QueueProcessor`] runs it on an
//! interval until shutdown.

mod delivery;
mod error;
mod processor;
mod report;
mod transport;
mod worker;

pub use delivery::{Delivery, DirectDelivery, QueuedDelivery};
pub use error::{DeliveryError, PermanentError, SystemError, TemporaryError, TransportError};
pub use processor::QueueProcessor;
pub use report::{EntryOutcome, SkipReason, SweepReport};
pub use transport::Transport;
pub use worker::{DEFAULT_STALE_CLAIM, QueueWorker};
