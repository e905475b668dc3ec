use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use rand::Rng;

/// Prefix of the claim marker a worker links next to an entry it is sending
pub const CLAIM_PREFIX: &str = ".sending-";

/// Prefix given to entries quarantined after a permanent failure
pub const REJECTED_PREFIX: &str = ".rejected-";

const RANDOM_MAX: u32 = 0x7fff_ffff;

/// Name of a queue entry.
///
/// Names follow the maildir convention `{unix-timestamp}.{pid}.{host}.{random}`
/// so writers on different hosts sharing one queue directory do not collide.
/// The name is the same in the staging area and once published.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryName {
    name: String,
}

impl EntryName {
    /// Generate a fresh name for this process on this host
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let random = rand::rng().random_range(0..RANDOM_MAX);

        Self {
            name: format!(
                "{timestamp}.{}.{}.{random}",
                std::process::id(),
                sanitise_host(courier_common::host::hostname())
            ),
        }
    }

    /// Accept a directory entry name as a queue entry name.
    ///
    /// Maildir readers skip everything starting with a dot, which covers
    /// claim markers, quarantined entries and editor droppings. Names that
    /// could escape the queue directory are rejected too.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.is_empty()
            || filename.starts_with('.')
            || filename.contains('/')
            || filename.contains('\\')
        {
            return None;
        }

        Some(Self {
            name: filename.to_string(),
        })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// File name of the claim marker for this entry
    pub fn claim_marker(&self) -> String {
        format!("{CLAIM_PREFIX}{}", self.name)
    }

    /// File name this entry is given when quarantined
    pub fn rejected(&self) -> String {
        format!("{REJECTED_PREFIX}{}", self.name)
    }
}

impl std::fmt::Display for EntryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Maildir forbids `/` and `:` in the host part of a name
fn sanitise_host(host: &str) -> String {
    host.replace('/', "\\057").replace(':', "\\072")
}

/// A published entry as seen by a listing of the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef {
    pub name: EntryName,
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl EntryRef {
    fn sibling(&self, filename: &str) -> PathBuf {
        self.path
            .parent()
            .map_or_else(|| PathBuf::from(filename), |dir| dir.join(filename))
    }

    /// Where a worker's claim marker for this entry lives
    pub fn claim_marker_path(&self) -> PathBuf {
        self.sibling(&self.name.claim_marker())
    }

    /// Where this entry goes when it is quarantined
    pub fn rejected_path(&self) -> PathBuf {
        self.sibling(&self.name.rejected())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
