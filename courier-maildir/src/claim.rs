//! Claim markers coordinating concurrent queue workers.
//!
//! A worker claims an entry by hard-linking it to `.sending-<name>` in the
//! same directory. Creating the link is atomic, so exactly one worker wins.
//! The marker is removed once the entry has been dealt with; a marker left
//! behind by a crashed worker is broken once it is old enough.

use std::{
    io,
    path::Path,
    time::{Duration, SystemTime},
};

use tokio::fs;

use crate::EntryRef;

/// State of the claim marker for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    /// No worker holds the entry
    Free,
    /// A worker touched the marker within the stale window
    Held { age: Duration },
    /// The marker is older than the stale window
    Stale { age: Duration },
}

/// Result of trying to take a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Acquired,
    /// Another worker created the marker first
    Contended,
    /// The entry disappeared before it could be claimed
    Gone,
}

/// Inspect the claim marker of `entry`
///
/// # Errors
/// If the marker exists but cannot be inspected
pub async fn claim_state(entry: &EntryRef, stale_after: Duration) -> io::Result<ClaimState> {
    let metadata = match fs::metadata(entry.claim_marker_path()).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(ClaimState::Free),
        Err(err) => return Err(err),
    };

    let age = SystemTime::now()
        .duration_since(metadata.modified()?)
        .unwrap_or_default();

    Ok(if age > stale_after {
        ClaimState::Stale { age }
    } else {
        ClaimState::Held { age }
    })
}

/// Remove a stale marker. Returns `false` when the marker was already gone,
/// meaning another worker got there first.
///
/// # Errors
/// If the marker exists but cannot be removed
pub async fn break_claim(entry: &EntryRef) -> io::Result<bool> {
    match fs::remove_file(entry.claim_marker_path()).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Set the modification time of `path` to now.
///
/// Entries are touched before they are claimed so that a hard-linked
/// marker starts its stale window at the moment of claiming.
///
/// # Errors
/// If the file cannot be opened or its time cannot be set
pub async fn touch(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .append(true)
            .open(&path)?
            .set_modified(SystemTime::now())
    })
    .await
    .map_err(io::Error::other)?
}

/// Atomically claim `entry` for sending.
///
/// Filesystems without hard links get an exclusively created marker file
/// instead, which carries the same mutual exclusion.
///
/// # Errors
/// If the marker cannot be created for a reason other than contention or
/// the entry vanishing
pub async fn acquire_claim(entry: &EntryRef) -> io::Result<ClaimOutcome> {
    let marker = entry.claim_marker_path();

    match fs::hard_link(&entry.path, &marker).await {
        Ok(()) => Ok(ClaimOutcome::Acquired),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(ClaimOutcome::Contended),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(ClaimOutcome::Gone),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied
            ) =>
        {
            tracing::debug!(error = %err, "Hard links unavailable, using a marker file");
            create_marker_file(entry).await
        }
        Err(err) => Err(err),
    }
}

/// Claim `entry` with an exclusively created empty marker file
///
/// # Errors
/// If the marker cannot be created for a reason other than contention
pub async fn create_marker_file(entry: &EntryRef) -> io::Result<ClaimOutcome> {
    if !fs::try_exists(&entry.path).await? {
        return Ok(ClaimOutcome::Gone);
    }

    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(entry.claim_marker_path())
        .await
    {
        Ok(_) => Ok(ClaimOutcome::Acquired),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(ClaimOutcome::Contended),
        Err(err) => Err(err),
    }
}

/// Remove the marker of a claim this worker holds
///
/// # Errors
/// If the marker exists but cannot be removed
pub async fn release_claim(entry: &EntryRef) -> io::Result<()> {
    break_claim(entry).await.map(|_| ())
}
