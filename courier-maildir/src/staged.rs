use std::{
    io,
    path::{Path, PathBuf},
};

use courier_common::internal;
use tokio::{fs, sync::Mutex};

use crate::{
    EntryName,
    error::{Finalised, QueueError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Done(Finalised),
}

/// A message written to the staging area but not yet visible to readers.
///
/// Exactly one of [`publish`](Self::publish) or [`discard`](Self::discard)
/// takes effect. Repeating the same call is a no-op, calling the other one
/// afterwards fails with [`QueueError::AlreadyFinalised`]. Dropping a staged
/// message that was never finalised removes the staged file.
#[derive(Debug)]
pub struct StagedMessage {
    name: EntryName,
    staged: PathBuf,
    published: PathBuf,
    state: Mutex<State>,
}

impl StagedMessage {
    pub(crate) fn new(name: EntryName, staged: PathBuf, published: PathBuf) -> Self {
        Self {
            name,
            staged,
            published,
            state: Mutex::new(State::Pending),
        }
    }

    #[inline]
    pub const fn name(&self) -> &EntryName {
        &self.name
    }

    /// Where the message sits until it is published
    #[inline]
    pub fn staged_path(&self) -> &Path {
        &self.staged
    }

    /// Where the message will be visible once published
    #[inline]
    pub fn published_path(&self) -> &Path {
        &self.published
    }

    /// Atomically move the message into the published area.
    ///
    /// # Errors
    /// - [`QueueError::AlreadyFinalised`] if the message was discarded
    /// - [`QueueError::Io`] if the rename fails; the message stays staged
    pub async fn publish(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        match *state {
            State::Done(Finalised::Published) => return Ok(()),
            State::Done(Finalised::Discarded) => {
                return Err(QueueError::AlreadyFinalised {
                    name: self.name.clone(),
                    state: Finalised::Discarded,
                });
            }
            State::Pending => {}
        }

        fs::rename(&self.staged, &self.published).await?;
        *state = State::Done(Finalised::Published);

        if let Some(dir) = self.published.parent()
            && let Err(err) = sync_dir(dir).await
        {
            tracing::warn!(entry = %self.name, error = %err, "Unable to sync queue directory");
        }

        internal!("Published {}", self.name);
        Ok(())
    }

    /// Remove the staged file so the message is never published.
    ///
    /// # Errors
    /// - [`QueueError::AlreadyFinalised`] if the message was published
    /// - [`QueueError::Io`] if the staged file cannot be removed
    pub async fn discard(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        match *state {
            State::Done(Finalised::Discarded) => return Ok(()),
            State::Done(Finalised::Published) => {
                return Err(QueueError::AlreadyFinalised {
                    name: self.name.clone(),
                    state: Finalised::Published,
                });
            }
            State::Pending => {}
        }

        match fs::remove_file(&self.staged).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        *state = State::Done(Finalised::Discarded);

        internal!("Discarded {}", self.name);
        Ok(())
    }

    /// Whether the message has been published or discarded
    pub async fn finalised(&self) -> Option<Finalised> {
        match *self.state.lock().await {
            State::Pending => None,
            State::Done(how) => Some(how),
        }
    }
}

impl Drop for StagedMessage {
    fn drop(&mut self) {
        if *self.state.get_mut() == State::Pending {
            match std::fs::remove_file(&self.staged) {
                Ok(()) => {
                    internal!("Removed abandoned staged message {}", self.name);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(
                        entry = %self.name,
                        error = %err,
                        "Unable to remove abandoned staged message"
                    );
                }
            }
        }
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
#[allow(clippy::unused_async)]
async fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
