//! Concurrent entry store with expiry-first, then LRU, eviction.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use super::entry::{CacheEntry, ResponseParts};
use super::key::CacheKey;

/// Result of a store lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Entry exists and is within its TTL; `age` is the time since it was stored.
    Fresh { response: ResponseParts, age: Duration },
    /// Entry exists but its TTL has elapsed.
    Stale,
    /// No entry for the key.
    Absent,
}

/// In-memory response store keyed by [`CacheKey`].
///
/// Per-key reads and writes go through the map's shard locks, so a lookup
/// never observes a half-written entry. Inserts are serialized by
/// `admission` so the capacity check, eviction and insert act as one step
/// and `len()` never exceeds `max_entries`.
pub struct CacheStore {
    entries: DashMap<CacheKey, CacheEntry>,
    max_entries: AtomicUsize,
    admission: Mutex<()>,
}

impl CacheStore {
    /// `max_entries` is clamped to a minimum of 1.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: AtomicUsize::new(max_entries.max(1)),
            admission: Mutex::new(()),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries.load(Ordering::Relaxed)
    }

    /// Change the capacity; takes effect on the next insert.
    pub fn set_max_entries(&self, max_entries: usize) {
        self.max_entries.store(max_entries.max(1), Ordering::Relaxed);
    }

    /// Look up `key` as of `now`. Fresh lookups count as an access.
    pub fn lookup(&self, key: &CacheKey, now: Instant) -> Lookup {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                if entry.is_fresh_at(now) {
                    entry.last_access = now;
                    entry.hits = entry.hits.saturating_add(1);
                    Lookup::Fresh {
                        response: entry.response.clone(),
                        age: entry.age_at(now),
                    }
                } else {
                    Lookup::Stale
                }
            }
            None => Lookup::Absent,
        }
    }

    /// Store a response, replacing any previous entry for `key`.
    ///
    /// When the key is new and the store is full, expired entries are
    /// dropped first, then the least recently used ones.
    pub fn insert(
        &self,
        key: CacheKey,
        response: ResponseParts,
        ttl: Duration,
        now: Instant,
    ) {
        let _admission = match self.admission.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !self.entries.contains_key(&key) {
            let max = self.max_entries();
            if self.entries.len() >= max {
                self.evict_expired(now);
            }
            while self.entries.len() >= max {
                if !self.evict_lru() {
                    break;
                }
            }
        }
        self.entries.insert(key, CacheEntry::new(response, ttl, now));
    }

    /// Drop the entry for `key`. Returns whether one existed.
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Sum of stored body sizes.
    pub fn total_body_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.body_len()).sum()
    }

    fn evict_expired(&self, now: Instant) {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_fresh_at(now));
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, "Evicted expired cache entries");
        }
    }

    fn evict_lru(&self) -> bool {
        // Collect the victim first: removing while iterating would deadlock
        // on the shard lock.
        let victim = self
            .entries
            .iter()
            .min_by_key(|e| e.last_access)
            .map(|e| e.key().clone());
        match victim {
            Some(key) => {
                debug!(key = %key.short(), "Evicting LRU cache entry");
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_entry_mut<R>(
        &self,
        key: &CacheKey,
        f: impl FnOnce(&mut CacheEntry) -> R,
    ) -> Option<R> {
        self.entries.get_mut(key).map(|mut e| f(&mut e))
    }
}
