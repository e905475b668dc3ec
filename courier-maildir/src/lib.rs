//! A maildir used as a crash-safe outbound mail queue.
//!
//! Messages are written in two phases: [`Maildir::stage`] makes the bytes
//! durable in `tmp`, and [`StagedMessage::publish`] renames them into `new`
//! where queue workers find them via [`Maildir::list_published`]. The
//! [`claim`] module holds the marker files workers use to avoid sending the
//! same entry twice.

pub mod claim;
pub mod config;
pub mod error;
pub mod maildir;
pub mod staged;
pub mod types;

pub use claim::{ClaimOutcome, ClaimState};
pub use config::{MaildirConfig, MaildirConfigBuilder};
pub use error::{Finalised, QueueError, Result};
pub use maildir::{Maildir, NameSource};
pub use staged::StagedMessage;
pub use types::{CLAIM_PREFIX, EntryName, EntryRef, REJECTED_PREFIX};
