//! Error types for the courier-maildir crate.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

use crate::EntryName;

/// How a staged message was finalised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalised {
    Published,
    Discarded,
}

impl fmt::Display for Finalised {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Published => "published",
            Self::Discarded => "discarded",
        })
    }
}

/// Errors raised by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Every candidate name for a staged file was already taken.
    #[error("No free entry name in {} after {attempts} attempts", dir.display())]
    StoreExhausted { dir: PathBuf, attempts: u32 },

    /// A staged message was published after being discarded, or the reverse.
    #[error("Staged message {name} was already {state}")]
    AlreadyFinalised { name: EntryName, state: Finalised },

    /// The directory is missing one of `tmp`, `new` or `cur`.
    #[error("{} is not a maildir: missing {missing}", path.display())]
    NotAMaildir { path: PathBuf, missing: &'static str },
}

/// Specialised `Result` type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
