//! Locking for the workspace.
//!
//! Two kinds of lock live here:
//!
//! - [`LockTable`]: in-process mutexes, one per repository identity, that
//!   serialize clone, pull and cleanup of the same repository.
//! - [`WorkspaceLock`]: an exclusive `flock` on `<workspace>/.daemon.lock`
//!   that keeps two daemons from sharing one workspace.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use fs2::FileExt;

use crate::types::RepoId;

/// Lazily populated map from repository identity to its lock.
///
/// The map's own shard guard is only held while looking up or inserting an
/// entry. Callers lock the returned mutex themselves, so a slow clone of one
/// repository never blocks lookups for another.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<RepoId, Arc<Mutex<()>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the lock for `id`, creating it on first use.
    ///
    /// Every caller asking for the same identity gets the same mutex.
    pub fn lock_for(&self, id: &RepoId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Drop the entry for `id` unless another caller still holds it.
    ///
    /// Returns true if the entry is gone afterwards.
    pub fn remove(&self, id: &RepoId) -> bool {
        self.locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
        !self.locks.contains_key(id)
    }

    /// Drop every entry that no caller is holding.
    pub fn clear(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// A guard that holds an exclusive lock on the workspace.
/// Lock is released when dropped.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
}

impl WorkspaceLock {
    /// Try to acquire the lock without blocking.
    /// Returns None if the lock is held by another process.
    /// Creates the lock file and parent dirs if needed.
    pub fn try_acquire(lock_path: &Path) -> io::Result<Option<Self>> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
