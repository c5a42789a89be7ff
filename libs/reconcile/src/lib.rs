//! Reconciliation primitives for elastic container pools.
//!
//! This library provides the pieces the allocation controller composes to
//! converge an actual container count onto a target count:
//!
//! - **Release cache**: remembers which containers the controller itself
//!   released, so their completion notifications are not mistaken for failures.
//! - **Scale planning**: a pure diff of target vs. current that decides how
//!   many requests to add, which outstanding requests to withdraw and which
//!   running containers to release.
//! - **Retry tracking**: bounds how often the same identity fails within a
//!   window.
//!
//! # Invariants
//!
//! - Planning is deterministic given the same inputs
//! - Planning never selects a candidate the caller did not offer as eligible

mod release_cache;
mod scale;

pub use release_cache::{ReleaseCache, DEFAULT_RELEASE_CACHE_TTL};
pub use scale::{plan_scale, ConvergenceStatus, ScalePlan};

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Retry tracker for repeatedly failing identities.
#[derive(Debug, Clone)]
pub struct RetryTracker<K: Ord> {
    /// Maximum retries per key.
    max_retries: u32,

    /// Retry window duration.
    window: Duration,

    /// Tracked failures: key -> (count, first_failure_time).
    failures: BTreeMap<K, (u32, Instant)>,
}

impl<K: Ord + Clone> RetryTracker<K> {
    /// Create a new retry tracker.
    pub fn new(max_retries: u32, window: Duration) -> Self {
        Self {
            max_retries,
            window,
            failures: BTreeMap::new(),
        }
    }

    /// Record a failure for a key.
    ///
    /// Returns true if retries are exhausted.
    pub fn record_failure(&mut self, key: &K) -> bool {
        self.record_failure_at(key, Instant::now())
    }

    /// Record a failure observed at `now`.
    pub fn record_failure_at(&mut self, key: &K, now: Instant) -> bool {
        let (count, first) = self.failures.entry(key.clone()).or_insert((0, now));

        // Reset if outside window
        if now.duration_since(*first) > self.window {
            *count = 0;
            *first = now;
        }

        *count += 1;
        *count > self.max_retries
    }

    /// Clear failure tracking for a key (on success).
    pub fn clear(&mut self, key: &K) {
        self.failures.remove(key);
    }

    /// Prune expired entries.
    pub fn prune(&mut self) {
        self.prune_at(Instant::now());
    }

    /// Prune entries whose window has closed by `now`.
    pub fn prune_at(&mut self, now: Instant) {
        self.failures
            .retain(|_, (_, first)| now.duration_since(*first) <= self.window);
    }

    /// Number of keys with failures inside their window.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// True when no failures are tracked.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Default failures tolerated per instance name before it is retired.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default retry window.
pub const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(10 * 60); // 10 minutes

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_tracker() {
        let mut tracker = RetryTracker::new(3, Duration::from_secs(60));
        let key = "YarnTaskRunner_1".to_string();

        assert!(!tracker.record_failure(&key)); // 1st
        assert!(!tracker.record_failure(&key)); // 2nd
        assert!(!tracker.record_failure(&key)); // 3rd
        assert!(tracker.record_failure(&key)); // 4th - exhausted
        assert!(!tracker.record_failure(&"YarnTaskRunner_2".to_string()));

        tracker.clear(&key);
        assert!(!tracker.record_failure(&key));
    }

    #[test]
    fn test_prune_drops_closed_windows() {
        let mut tracker = RetryTracker::new(3, Duration::from_secs(10));
        let start = Instant::now();

        tracker.record_failure_at(&"a", start);
        tracker.record_failure_at(&"b", start + Duration::from_secs(8));
        tracker.prune_at(start + Duration::from_secs(12));

        assert_eq!(tracker.len(), 1);
        tracker.prune_at(start + Duration::from_secs(30));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_retry_tracker_window_resets() {
        let mut tracker = RetryTracker::new(1, Duration::from_secs(10));
        let start = Instant::now();

        assert!(!tracker.record_failure_at(&"a", start));
        assert!(tracker.record_failure_at(&"a", start + Duration::from_secs(1)));
        // Outside the window the count starts over.
        assert!(!tracker.record_failure_at(&"a", start + Duration::from_secs(30)));
    }
}
