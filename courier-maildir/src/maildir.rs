use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use courier_common::{Message, envelope, internal};
use tokio::{fs, io::AsyncWriteExt};

use crate::{
    EntryName, EntryRef, MaildirConfig, StagedMessage,
    error::{QueueError, Result},
};

/// Staging area, invisible to readers
pub const TMP: &str = "tmp";
/// Freshly published entries
pub const NEW: &str = "new";
/// Entries moved aside by other maildir tools; read the same as `new`
pub const CUR: &str = "cur";

/// Pause between attempts when a generated name is already taken
const NAME_COLLISION_BACKOFF: Duration = Duration::from_millis(10);

const DEFAULT_ORPHAN_MAX_AGE: Duration = Duration::from_secs(36 * 60 * 60);

/// Produces candidate entry names
pub type NameSource = Arc<dyn Fn() -> EntryName + Send + Sync>;

/// A directory laid out as a maildir, used as a durable message queue.
///
/// Writers stage a message in `tmp`, then rename it into `new` when the
/// surrounding transaction commits. Readers only ever look at `new` and
/// `cur`, so a message is either wholly visible or not visible at all.
/// Several processes may share one queue directory.
#[derive(Clone)]
pub struct Maildir {
    root: PathBuf,
    names: NameSource,
    max_name_attempts: u32,
    orphan_max_age: Duration,
}

impl fmt::Debug for Maildir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Maildir")
            .field("root", &self.root)
            .field("max_name_attempts", &self.max_name_attempts)
            .field("orphan_max_age", &self.orphan_max_age)
            .finish_non_exhaustive()
    }
}

impl Maildir {
    /// Open the maildir described by `config`, creating it when allowed.
    ///
    /// # Errors
    /// - [`QueueError::NotAMaildir`] if a subdirectory is missing and
    ///   creation is disabled
    /// - [`QueueError::Io`] if the directories cannot be created or read
    pub async fn open(config: &MaildirConfig) -> Result<Self> {
        let maildir = Self::open_path(config.path(), config.create()).await?;
        Ok(maildir
            .with_max_name_attempts(config.max_name_attempts())
            .with_orphan_max_age(config.orphan_max_age()))
    }

    /// Open the maildir rooted at `root`.
    ///
    /// # Errors
    /// See [`Maildir::open`]
    pub async fn open_path(root: impl Into<PathBuf>, create: bool) -> Result<Self> {
        let root = root.into();

        for sub in [TMP, NEW, CUR] {
            let dir = root.join(sub);
            if create {
                fs::create_dir_all(&dir).await?;
                continue;
            }

            match fs::metadata(&dir).await {
                Ok(metadata) if metadata.is_dir() => {}
                Ok(_) => {
                    return Err(QueueError::NotAMaildir {
                        path: root,
                        missing: sub,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Err(QueueError::NotAMaildir {
                        path: root,
                        missing: sub,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        internal!("Opened maildir at {}", root.display());

        Ok(Self {
            root,
            names: Arc::new(EntryName::generate),
            max_name_attempts: 100,
            orphan_max_age: DEFAULT_ORPHAN_MAX_AGE,
        })
    }

    /// Replace the name generator
    #[must_use]
    pub fn with_name_source(mut self, names: NameSource) -> Self {
        self.names = names;
        self
    }

    #[must_use]
    pub fn with_max_name_attempts(mut self, attempts: u32) -> Self {
        self.max_name_attempts = attempts.max(1);
        self
    }

    /// Set how old a staged file must be before it counts as orphaned
    #[must_use]
    pub fn with_orphan_max_age(mut self, age: Duration) -> Self {
        self.orphan_max_age = age;
        self
    }

    #[inline]
    pub const fn orphan_max_age(&self) -> Duration {
        self.orphan_max_age
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP)
    }

    #[inline]
    pub fn new_dir(&self) -> PathBuf {
        self.root.join(NEW)
    }

    #[inline]
    pub fn cur_dir(&self) -> PathBuf {
        self.root.join(CUR)
    }

    /// Write `data` durably into the staging area.
    ///
    /// The file is created exclusively with owner-only permissions and
    /// flushed to disk before this returns. On a name collision another
    /// name is tried after a short pause.
    ///
    /// # Errors
    /// - [`QueueError::StoreExhausted`] if every attempted name was taken
    /// - [`QueueError::Io`] if the file cannot be created or written; no
    ///   partial file is left behind
    #[tracing::instrument(skip_all, fields(maildir = %self.root.display(), size = data.len()))]
    pub async fn stage(&self, data: &[u8]) -> Result<StagedMessage> {
        let tmp = self.tmp_dir();

        for attempt in 1..=self.max_name_attempts {
            let name = (self.names)();
            let path = tmp.join(name.as_str());

            let mut options = fs::OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            options.mode(0o600);

            let mut file = match options.open(&path).await {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::debug!(%name, attempt, "Entry name already taken");
                    tokio::time::sleep(NAME_COLLISION_BACKOFF).await;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let written = async {
                file.write_all(data).await?;
                file.sync_all().await
            }
            .await;

            if let Err(err) = written {
                drop(file);
                if let Err(cleanup) = fs::remove_file(&path).await {
                    tracing::warn!(%name, error = %cleanup, "Unable to remove partial staged file");
                }
                return Err(err.into());
            }

            internal!("Staged {name}");
            let published = self.new_dir().join(name.as_str());
            return Ok(StagedMessage::new(name, path, published));
        }

        Err(QueueError::StoreExhausted {
            dir: tmp,
            attempts: self.max_name_attempts,
        })
    }

    /// Stage `message` with its envelope embedded so it can be sent later
    /// from the file alone.
    ///
    /// # Errors
    /// See [`Maildir::stage`]
    pub async fn stage_message(&self, message: &Message) -> Result<StagedMessage> {
        self.stage(&envelope::embed(message)).await
    }

    /// Every published entry, oldest modification time first.
    ///
    /// Both `cur` and `new` are read. Names starting with a dot (claim
    /// markers, quarantined entries) and anything that is not a regular
    /// file are skipped. Ties are broken by name so the order is stable
    /// between listings, but names end in a random part: entries published
    /// within one tick of the filesystem's mtime resolution are not
    /// guaranteed to come back in enqueue order.
    ///
    /// # Errors
    /// If either directory cannot be read
    pub async fn list_published(&self) -> Result<Vec<EntryRef>> {
        let mut entries = Vec::new();

        for dir in [self.cur_dir(), self.new_dir()] {
            let mut reader = fs::read_dir(&dir).await?;

            while let Some(entry) = reader.next_entry().await? {
                let filename = entry.file_name();
                let Some(name) = filename.to_str().and_then(EntryName::from_filename) else {
                    continue;
                };

                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                    Err(err) => return Err(err.into()),
                };

                if !metadata.is_file() {
                    continue;
                }

                entries.push(EntryRef {
                    name,
                    path: entry.path(),
                    modified: metadata.modified()?,
                });
            }
        }

        entries.sort_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.name.cmp(&b.name))
        });

        Ok(entries)
    }

    /// Read the raw bytes of a published entry
    ///
    /// # Errors
    /// If the entry cannot be read, including when it has been removed
    pub async fn read_entry(&self, entry: &EntryRef) -> Result<Vec<u8>> {
        Ok(fs::read(&entry.path).await?)
    }

    /// Delete a published entry. An entry that is already gone is fine.
    ///
    /// # Errors
    /// If the entry exists but cannot be removed
    pub async fn remove_entry(&self, entry: &EntryRef) -> Result<()> {
        match fs::remove_file(&entry.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Move a published entry aside so it is never listed again.
    ///
    /// The entry is renamed to its dot-prefixed rejected name in the same
    /// directory, which keeps it on the same filesystem for inspection.
    ///
    /// # Errors
    /// If the entry exists but cannot be renamed
    pub async fn quarantine_entry(&self, entry: &EntryRef) -> Result<()> {
        match fs::rename(&entry.path, entry.rejected_path()).await {
            Ok(()) => {
                internal!(level = WARN, "Quarantined {}", entry.name);
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove staged files older than `max_age`.
    ///
    /// These are left behind when a writer crashes between staging and
    /// finalising. Returns how many files were removed.
    ///
    /// # Errors
    /// If the staging area cannot be read
    pub async fn purge_orphans(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        let mut reader = fs::read_dir(self.tmp_dir()).await?;

        while let Some(entry) = reader.next_entry().await? {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };

            if !metadata.is_file() {
                continue;
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();

            if age <= max_age {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(
                        path = %entry.path().display(),
                        error = %err,
                        "Unable to remove orphaned staged file"
                    );
                }
            }
        }

        if removed > 0 {
            internal!(level = INFO, "Purged {removed} orphaned staged files");
        }

        Ok(removed)
    }
}
