//! Cache Statistics Module
//!
//! Ready-made thread-safe counter target plus a serializable snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::lru::Target;

// == Cache Stats ==
/// Atomic implementation of [`Target`].
///
/// Counters use relaxed ordering: they feed dashboards and hit-rate
/// arithmetic, not synchronization.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    del_hits: AtomicU64,
    del_misses: AtomicU64,
}

impl CacheStats {
    /// Creates a stats target with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookups served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Misses whose fetch succeeded.
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Misses whose fetch failed.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Explicit deletes that found their key.
    pub fn del_hits(&self) -> u64 {
        self.del_hits.load(Ordering::Relaxed)
    }

    /// Explicit deletes that found nothing.
    pub fn del_misses(&self) -> u64 {
        self.del_misses.load(Ordering::Relaxed)
    }

    /// Share of lookups served from the cache, 0.0 when nothing has been
    /// looked up yet.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.successes() + self.failures();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits(),
            successes: self.successes(),
            failures: self.failures(),
            del_hits: self.del_hits(),
            del_misses: self.del_misses(),
        }
    }
}

impl Target for CacheStats {
    fn incr_get_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_get_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_get_failed(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_del_hit(&self) {
        self.del_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_del_not_found(&self) {
        self.del_misses.fetch_add(1, Ordering::Relaxed);
    }
}

// == Snapshot ==
/// Frozen counter values, suitable for metrics endpoints and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub successes: u64,
    pub failures: u64,
    pub del_hits: u64,
    pub del_misses: u64,
}
