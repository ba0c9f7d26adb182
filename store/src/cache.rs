//! LRU projection cache with optional expiration.
//!
//! Sits in front of a [`ProjectionStore`](prism_core::projection::ProjectionStore)
//! to avoid a read round-trip per event. Entries are evicted
//! least-recently-used when the cache is full, and lazily on expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// When a cached projection stops being trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiration {
    /// Entries never expire; only LRU eviction removes them.
    Never,
    /// Entries expire a fixed duration after they were cached.
    Absolute(Duration),
    /// Entries expire a fixed duration after they were last accessed.
    Sliding(Duration),
}

#[derive(Clone, Debug)]
struct CachedProjection<P> {
    value: P,
    cached_at: Instant,
    last_accessed: Instant,
}

impl<P> CachedProjection<P> {
    fn new(value: P) -> Self {
        let now = Instant::now();
        Self {
            value,
            cached_at: now,
            last_accessed: now,
        }
    }

    fn is_expired(&self, expiration: Expiration) -> bool {
        match expiration {
            Expiration::Never => false,
            Expiration::Absolute(ttl) => self.cached_at.elapsed() > ttl,
            Expiration::Sliding(ttl) => self.last_accessed.elapsed() > ttl,
        }
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// Bounded LRU cache of projections keyed by their string key.
///
/// Thread-safe; hit and miss counters are exposed for tuning.
#[derive(Debug)]
pub struct LruProjectionCache<P> {
    capacity: usize,
    expiration: Expiration,
    entries: Mutex<HashMap<String, CachedProjection<P>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<P: Clone> LruProjectionCache<P> {
    /// An empty cache holding at most `capacity` projections.
    ///
    /// A `capacity` of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize, expiration: Expiration) -> Self {
        Self {
            capacity: capacity.max(1),
            expiration,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The cached projection for `key`, if present and not expired.
    pub fn get(&self, key: &str) -> Option<P> {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(key) {
            if entry.is_expired(self.expiration) {
                entries.remove(key);
            } else {
                entry.touch();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Cache `value` under `key`, evicting expired entries first and the
    /// least-recently-used entry when full.
    pub fn add(&self, key: String, value: P) {
        let mut entries = self.lock();
        entries.retain(|_, entry| !entry.is_expired(self.expiration));
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let lru_key = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(lru_key, _)| lru_key.clone());
            if let Some(lru_key) = lru_key {
                entries.remove(&lru_key);
            }
        }
        entries.insert(key, CachedProjection::new(value));
    }

    /// Drop the entry for `key`; returns whether one was present.
    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop every entry. The counters keep their values.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of cached projections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache holds no projections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Lookups answered from the cache.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that fell through to the store.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedProjection<P>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can unwrap
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn the_least_recently_used_entry_is_evicted_at_capacity() {
        let cache = LruProjectionCache::new(2, Expiration::Never);
        cache.add("a".to_string(), 1);
        cache.add("b".to_string(), 2);

        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get("a"), Some(1));
        cache.add("c".to_string(), 3);

        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn overwriting_a_key_does_not_evict_another() {
        let cache = LruProjectionCache::new(2, Expiration::Never);
        cache.add("a".to_string(), 1);
        cache.add("b".to_string(), 2);
        cache.add("a".to_string(), 10);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn absolute_expiration_removes_entries_regardless_of_access() {
        let cache = LruProjectionCache::new(10, Expiration::Absolute(Duration::from_millis(30)));
        cache.add("a".to_string(), 1);
        assert_eq!(cache.get("a"), Some(1));

        sleep(Duration::from_millis(40));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn sliding_expiration_is_reset_by_access() {
        let cache = LruProjectionCache::new(10, Expiration::Sliding(Duration::from_millis(60)));
        cache.add("a".to_string(), 1);

        sleep(Duration::from_millis(35));
        assert_eq!(cache.get("a"), Some(1));
        sleep(Duration::from_millis(35));
        assert_eq!(cache.get("a"), Some(1));

        sleep(Duration::from_millis(80));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn hit_and_miss_counters_track_lookups() {
        let cache = LruProjectionCache::new(10, Expiration::Never);
        cache.add("a".to_string(), 1);

        let _ = cache.get("a");
        let _ = cache.get("a");
        let _ = cache.get("missing");

        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn remove_reports_whether_the_key_was_cached() {
        let cache = LruProjectionCache::new(10, Expiration::Never);
        cache.add("a".to_string(), 1);

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert!(cache.is_empty());
    }
}
