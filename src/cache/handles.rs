//! Bounded cache of open repository handles.
//!
//! Entries expire `ttl` after their last access and the least recently
//! accessed entry is evicted when the cache is full. There is no background
//! timer: expired entries are dropped when looked up and swept before every
//! insertion.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use super::repo::RepoHandle;
use crate::types::RepoId;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_secs: u64,
    pub total_access_count: u64,
}

struct CachedRepository {
    handle: Arc<RepoHandle>,
    url: String,
    last_accessed: Instant,
    access_count: u64,
}

/// Identity-keyed cache of repository handles.
///
/// Recency order lives in the [`LruCache`]; `last_accessed` only drives
/// expiry.
pub struct RepositoryCache {
    entries: Mutex<LruCache<RepoId, CachedRepository>>,
    ttl: Duration,
    max_entries: NonZeroUsize,
    clock: Box<dyn Clock>,
}

impl RepositoryCache {
    /// Create a cache holding at most `max_entries` handles (at least one).
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self::with_clock(ttl, max_entries, Box::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, max_entries: usize, clock: Box<dyn Clock>) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(max_entries)),
            ttl,
            max_entries,
            clock,
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<RepoId, CachedRepository>> {
        // The cache stays consistent even if a holder panicked mid-update.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_live(&self, entry: &CachedRepository, now: Instant) -> bool {
        now.saturating_duration_since(entry.last_accessed) < self.ttl
    }

    /// Return the cached handle for `id`, refreshing its access time.
    ///
    /// An expired entry is evicted and reported as a miss.
    pub fn lookup(&self, id: &RepoId) -> Option<Arc<RepoHandle>> {
        let now = self.clock.now();
        let mut entries = self.entries();

        let live = self.is_live(entries.peek(id)?, now);
        if !live {
            if let Some(entry) = entries.pop(id) {
                log::debug!("Cache entry for {} ({}) expired", id, entry.url);
            }
            return None;
        }

        let entry = entries.get_mut(id)?;
        entry.last_accessed = now;
        entry.access_count += 1;
        Some(Arc::clone(&entry.handle))
    }

    /// Store `handle` under `id`, making room first.
    ///
    /// Expired entries are swept, then least recently used entries are
    /// evicted until there is a free slot. Replacing an existing entry resets
    /// its access count.
    pub fn insert(&self, id: RepoId, url: &str, handle: Arc<RepoHandle>) {
        let now = self.clock.now();
        let mut entries = self.entries();

        entries.pop(&id);

        let expired: Vec<RepoId> = entries
            .iter()
            .filter(|(_, entry)| !self.is_live(entry, now))
            .map(|(id, _)| id.clone())
            .collect();
        for stale in &expired {
            entries.pop(stale);
        }
        if !expired.is_empty() {
            log::debug!("Swept {} expired cache entries", expired.len());
        }

        while entries.len() >= self.max_entries.get() {
            let Some((oldest, entry)) = entries.pop_lru() else {
                break;
            };
            log::debug!("Evicted least recently used {} ({})", oldest, entry.url);
        }

        entries.put(
            id,
            CachedRepository {
                handle,
                url: url.to_string(),
                last_accessed: now,
                access_count: 1,
            },
        );
    }

    /// Drop the entry for `id`. Returns true if one was present.
    pub fn remove(&self, id: &RepoId) -> bool {
        self.entries().pop(id).is_some()
    }

    /// Drop every entry, returning how many there were.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Number of hits plus insertions recorded for `id`.
    pub fn access_count(&self, id: &RepoId) -> Option<u64> {
        self.entries().peek(id).map(|entry| entry.access_count)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries();
        CacheStats {
            size: entries.len(),
            max_size: self.max_entries.get(),
            ttl_secs: self.ttl.as_secs(),
            total_access_count: entries.iter().map(|(_, entry)| entry.access_count).sum(),
        }
    }
}
