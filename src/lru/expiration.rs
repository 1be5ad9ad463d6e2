//! Active-Expiry Shard
//!
//! Expired entries are purged the moment a read observes them, and every
//! capacity- or TTL-driven removal is reported through the evict
//! callback. Failed fetches are surfaced but never kept resident.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::{Mutex, RwLockWriteGuard};

use crate::error::{CacheError, Result};
use crate::lru::{BatchFetch, EvictCallback, Fetch, Lru, Slot, SlotState, Target};

// == Active Shard ==
/// Single cache shard with eager expiry at read time.
pub struct ExpirationLru<V> {
    core: Mutex<LruCache<String, Arc<Slot<V>>>>,
    success_ttl: Duration,
    failure_ttl: Duration,
    target: Arc<dyn Target>,
    on_evict: Option<EvictCallback>,
}

impl<V: Clone + Send + Sync> ExpirationLru<V> {
    /// Creates a shard holding at most `capacity` entries.
    pub fn new(
        capacity: NonZeroUsize,
        success_ttl: Duration,
        failure_ttl: Duration,
        target: Arc<dyn Target>,
        on_evict: Option<EvictCallback>,
    ) -> Self {
        Self {
            core: Mutex::new(LruCache::new(capacity)),
            success_ttl,
            failure_ttl,
            target,
            on_evict,
        }
    }

    fn notify_evict(&self, key: &str) {
        if let Some(cb) = &self.on_evict {
            cb(key);
        }
    }

    /// Removes `key` if it still maps to `slot`, so a concurrent `set`
    /// is never clobbered.
    fn remove_slot(&self, key: &str, slot: &Arc<Slot<V>>, report: bool) {
        let mut core = self.core.lock();
        let same = matches!(core.peek(key), Some(current) if Arc::ptr_eq(current, slot));
        if same {
            core.pop(key);
            if report {
                self.notify_evict(key);
            }
        }
    }

    /// Runs the fetch under the slot write lock. Failures are stored long
    /// enough for already-queued readers to observe them, then dropped
    /// from the map.
    fn resolve(
        &self,
        key: &str,
        slot: &Arc<Slot<V>>,
        mut state: RwLockWriteGuard<'_, SlotState<V>>,
        fetch: Fetch<'_, V>,
    ) -> Result<V> {
        match fetch() {
            Ok(value) => {
                *state = SlotState::Ready {
                    value: value.clone(),
                    deadline: Instant::now() + self.success_ttl,
                };
                drop(state);
                self.target.incr_get_success();
                Ok(value)
            }
            Err(err) => {
                *state = SlotState::Failed {
                    err: err.clone(),
                    deadline: Instant::now() + self.failure_ttl,
                };
                drop(state);
                self.remove_slot(key, slot, false);
                self.target.incr_get_failed();
                Err(err)
            }
        }
    }
}

impl<V: Clone + Send + Sync> Lru<V> for ExpirationLru<V> {
    fn get(&self, key: &str, fetch: Fetch<'_, V>) -> Result<V> {
        let mut fetch = Some(fetch);
        loop {
            let mut core = self.core.lock();
            let existing = core.get(key).map(Arc::clone);
            let Some(slot) = existing else {
                let slot = Arc::new(Slot::pending());
                let state = slot.state.write();
                if let Some((evicted, _)) = core.push(key.to_string(), Arc::clone(&slot)) {
                    if evicted != key {
                        self.notify_evict(&evicted);
                    }
                }
                drop(core);
                let fetch = fetch.take().expect("fetch consumed once");
                return self.resolve(key, &slot, state, fetch);
            };
            drop(core);

            let live = {
                let state = slot.state.read();
                if state.is_live() {
                    Some(state.outcome())
                } else {
                    None
                }
            };
            match live {
                Some(outcome) => {
                    self.target.incr_get_hit();
                    return outcome;
                }
                None => {
                    // Deadline passed (or a producer panic orphaned the
                    // slot): purge it, surface the removal, and retry as
                    // a miss.
                    self.remove_slot(key, &slot, true);
                }
            }
        }
    }

    fn get_batch(&self, keys: &[String], fetch: BatchFetch<'_, V>) -> Result<HashMap<String, V>> {
        let mut res = HashMap::with_capacity(keys.len());
        let mut first_err: Option<CacheError> = None;
        let mut misses: Vec<String> = Vec::new();

        for key in keys {
            let slot = { self.core.lock().get(key).map(Arc::clone) };
            let Some(slot) = slot else {
                misses.push(key.clone());
                continue;
            };

            enum Seen<V> {
                Value(V),
                Error(CacheError),
                Stale,
            }
            let seen = {
                let state = slot.state.read();
                match &*state {
                    SlotState::Ready { value, deadline } if *deadline > Instant::now() => {
                        Seen::Value(value.clone())
                    }
                    SlotState::Failed { err, deadline } if *deadline > Instant::now() => {
                        Seen::Error(err.clone())
                    }
                    _ => Seen::Stale,
                }
            };
            match seen {
                Seen::Value(value) => {
                    self.target.incr_get_hit();
                    res.insert(key.clone(), value);
                }
                Seen::Error(err) => {
                    self.target.incr_get_hit();
                    first_err.get_or_insert(err);
                }
                Seen::Stale => {
                    self.remove_slot(key, &slot, true);
                    misses.push(key.clone());
                }
            }
        }

        if !misses.is_empty() {
            match fetch(misses.clone()) {
                Ok(mut fetched) => {
                    let deadline = Instant::now() + self.success_ttl;
                    let mut evicted_keys = Vec::new();
                    let mut successes = 0u64;
                    let mut failures = 0u64;
                    {
                        let mut core = self.core.lock();
                        for key in &misses {
                            match fetched.remove(key) {
                                Some(value) => {
                                    let slot = Arc::new(Slot::ready(value.clone(), deadline));
                                    if let Some((evicted, _)) = core.push(key.clone(), slot) {
                                        if evicted != *key {
                                            evicted_keys.push(evicted);
                                        }
                                    }
                                    res.insert(key.clone(), value);
                                    successes += 1;
                                }
                                None => failures += 1,
                            }
                        }
                        for evicted in &evicted_keys {
                            self.notify_evict(evicted);
                        }
                    }
                    for _ in 0..successes {
                        self.target.incr_get_success();
                    }
                    for _ in 0..failures {
                        self.target.incr_get_failed();
                    }
                }
                Err(err) => {
                    for _ in &misses {
                        self.target.incr_get_failed();
                    }
                    first_err.get_or_insert(err);
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(res),
        }
    }

    fn set(&self, key: &str, value: V) {
        let slot = Arc::new(Slot::ready(value, Instant::now() + self.success_ttl));
        let mut core = self.core.lock();
        if let Some((evicted, _)) = core.push(key.to_string(), slot) {
            if evicted != key {
                self.notify_evict(&evicted);
            }
        }
    }

    fn set_if_present(&self, key: &str, value: V) -> bool {
        let mut core = self.core.lock();
        if !core.contains(key) {
            return false;
        }
        let slot = Arc::new(Slot::ready(value, Instant::now() + self.success_ttl));
        core.push(key.to_string(), slot);
        true
    }

    fn del(&self, key: &str) -> bool {
        let removed = { self.core.lock().pop(key).is_some() };
        if removed {
            self.target.incr_del_hit();
        } else {
            self.target.incr_del_not_found();
        }
        removed
    }

    fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lru::NoopTarget;
    use crate::stats::CacheStats;
    use parking_lot::Mutex as PlMutex;
    use std::thread::sleep;

    fn shard(capacity: usize, success_ttl: Duration) -> ExpirationLru<String> {
        ExpirationLru::new(
            NonZeroUsize::new(capacity).unwrap(),
            success_ttl,
            Duration::from_secs(5),
            Arc::new(NoopTarget),
            None,
        )
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = shard(10, Duration::from_secs(60));

        let value = cache.get("k", Box::new(|| Ok("v".to_string()))).unwrap();
        assert_eq!(value, "v");

        let value = cache.get("k", Box::new(|| Ok("w".to_string()))).unwrap();
        assert_eq!(value, "v");
    }

    #[test]
    fn test_failure_is_not_cached() {
        let cache = shard(10, Duration::from_secs(60));

        let err = cache
            .get("k", Box::new(|| Err::<String, _>(CacheError::fetch("down"))))
            .unwrap_err();
        assert_eq!(err.to_string(), "down");

        // The failed slot was purged; the next fetch runs immediately.
        let value = cache.get("k", Box::new(|| Ok("v".to_string()))).unwrap();
        assert_eq!(value, "v");
    }

    #[test]
    fn test_ttl_removal_fires_callback() {
        let evicted: Arc<PlMutex<Vec<String>>> = Arc::new(PlMutex::new(Vec::new()));
        let record = Arc::clone(&evicted);
        let cache = ExpirationLru::new(
            NonZeroUsize::new(10).unwrap(),
            Duration::from_millis(100),
            Duration::from_secs(5),
            Arc::new(NoopTarget),
            Some(Arc::new(move |key: &str| record.lock().push(key.to_string()))),
        );

        cache.get("k", Box::new(|| Ok("v1".to_string()))).unwrap();
        sleep(Duration::from_millis(150));

        let value = cache.get("k", Box::new(|| Ok("v2".to_string()))).unwrap();
        assert_eq!(value, "v2");
        assert_eq!(*evicted.lock(), vec!["k".to_string()]);
    }

    #[test]
    fn test_capacity_eviction_fires_callback() {
        let evicted: Arc<PlMutex<Vec<String>>> = Arc::new(PlMutex::new(Vec::new()));
        let record = Arc::clone(&evicted);
        let cache = ExpirationLru::new(
            NonZeroUsize::new(2).unwrap(),
            Duration::from_secs(60),
            Duration::from_secs(5),
            Arc::new(NoopTarget),
            Some(Arc::new(move |key: &str| record.lock().push(key.to_string()))),
        );

        cache.set("k1", "v1".to_string());
        cache.set("k2", "v2".to_string());
        cache.set("k3", "v3".to_string());

        assert_eq!(*evicted.lock(), vec!["k1".to_string()]);
    }

    #[test]
    fn test_hit_counter_on_served_value() {
        let stats = Arc::new(CacheStats::new());
        let cache = ExpirationLru::new(
            NonZeroUsize::new(10).unwrap(),
            Duration::from_secs(60),
            Duration::from_secs(5),
            Arc::clone(&stats) as Arc<dyn Target>,
            None,
        );

        cache.get("k", Box::new(|| Ok("v".to_string()))).unwrap();
        cache.get("k", Box::new(|| Ok("w".to_string()))).unwrap();

        assert_eq!(stats.successes(), 1);
        assert_eq!(stats.hits(), 1);
    }
}
