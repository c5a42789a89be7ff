//! Time-bounded record of self-initiated releases.
//!
//! Completion notifications from the cluster manager can arrive long after the
//! controller released a container. An unexpired entry here means the
//! completion is expected and must not be treated as a failure.
//!
//! Entries are evicted lazily: an expired entry is dropped when it is looked
//! up, and inserts sweep expired entries once the map has grown past the size
//! it had after the previous sweep.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default time an entry stays valid.
pub const DEFAULT_RELEASE_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct Entries<K> {
    expiries: HashMap<K, Instant>,
    sweep_at_len: usize,
}

/// Expiry-stamped set of released container ids.
///
/// Internally synchronized, independent of any registry lock.
#[derive(Debug)]
pub struct ReleaseCache<K> {
    ttl: Duration,
    entries: Mutex<Entries<K>>,
}

impl<K: Eq + Hash + Clone> ReleaseCache<K> {
    /// Create a cache whose entries expire `ttl` after insertion.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(Entries {
                expiries: HashMap::new(),
                sweep_at_len: 64,
            }),
        }
    }

    /// The configured entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record `key` as released. Re-inserting resets its expiry.
    pub fn put(&self, key: K) {
        self.put_at(key, Instant::now());
    }

    /// Record `key` as released at `now`.
    pub fn put_at(&self, key: K, now: Instant) {
        let mut entries = self.lock();
        if entries.expiries.len() >= entries.sweep_at_len {
            entries.expiries.retain(|_, expiry| now < *expiry);
            entries.sweep_at_len = (entries.expiries.len() * 2).max(64);
        }
        entries.expiries.insert(key, now + self.ttl);
    }

    /// True iff `key` was put and has not yet expired.
    pub fn contains(&self, key: &K) -> bool {
        self.contains_at(key, Instant::now())
    }

    /// Lookup as of `now`; an expired entry is evicted.
    pub fn contains_at(&self, key: &K, now: Instant) -> bool {
        let mut entries = self.lock();
        match entries.expiries.get(key) {
            Some(expiry) if now < *expiry => true,
            Some(_) => {
                entries.expiries.remove(key);
                false
            }
            None => false,
        }
    }

    /// Forget `key`, e.g. when a release could not be submitted.
    pub fn invalidate(&self, key: &K) {
        self.lock().expiries.remove(key);
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.lock().expiries.len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry.
    pub fn prune(&self) {
        let now = Instant::now();
        self.lock().expiries.retain(|_, expiry| now < *expiry);
    }

    // Every critical section leaves the map consistent, so a poisoned lock is
    // still safe to use.
    fn lock(&self) -> MutexGuard<'_, Entries<K>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Eq + Hash + Clone> Default for ReleaseCache<K> {
    fn default() -> Self {
        Self::new(DEFAULT_RELEASE_CACHE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_then_contains() {
        let cache = ReleaseCache::new(Duration::from_secs(2));
        cache.put("container_1");
        assert!(cache.contains(&"container_1"));
        assert!(!cache.contains(&"container_2"));
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let cache = ReleaseCache::new(Duration::from_secs(2));
        let start = Instant::now();

        cache.put_at("container_1", start);
        assert!(cache.contains_at(&"container_1", start + Duration::from_secs(1)));
        assert!(!cache.contains_at(&"container_1", start + Duration::from_secs(4)));
        // The expired lookup evicted it.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expiry_is_exclusive() {
        let cache = ReleaseCache::new(Duration::from_secs(2));
        let start = Instant::now();
        cache.put_at("c", start);
        assert!(!cache.contains_at(&"c", start + Duration::from_secs(2)));
    }

    #[test]
    fn test_reinsert_resets_expiry() {
        let cache = ReleaseCache::new(Duration::from_secs(2));
        let start = Instant::now();

        cache.put_at("c", start);
        cache.put_at("c", start + Duration::from_secs(1));
        assert!(cache.contains_at(&"c", start + Duration::from_millis(2500)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate() {
        let cache = ReleaseCache::new(Duration::from_secs(60));
        cache.put("c");
        cache.invalidate(&"c");
        assert!(!cache.contains(&"c"));
    }

    #[test]
    fn test_insert_sweeps_expired_entries() {
        let cache = ReleaseCache::new(Duration::from_secs(1));
        let start = Instant::now();
        for i in 0..64 {
            cache.put_at(i, start);
        }
        assert_eq!(cache.len(), 64);

        cache.put_at(1000, start + Duration::from_secs(5));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_at(&1000, start + Duration::from_secs(5)));
    }

    #[test]
    fn test_real_clock_expiry() {
        let cache = ReleaseCache::new(Duration::from_millis(20));
        cache.put("c");
        assert!(cache.contains(&"c"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!cache.contains(&"c"));
    }
}
