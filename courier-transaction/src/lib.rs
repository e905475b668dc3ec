//! Two-phase commit participation for mail side effects.
//!
//! Sending mail cannot be undone, so it must only happen once the
//! surrounding unit of work is certain to commit. A [`MailParticipant`]
//! joins a [`Transaction`] and holds the side effect back until the
//! coordinator calls [`ResourceManager::finish`].

pub mod error;
pub mod handle;
pub mod participant;
pub mod resource;
pub mod testing;

pub use error::{ActionKind, BoxError, TransactionError};
pub use handle::{Savepoint, TransactionHandle};
pub use participant::{Action, MailParticipant, Phase};
pub use resource::{ResourceManager, Transaction};
pub use testing::TestTransaction;
