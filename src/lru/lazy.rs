//! Lazy-Expiry Shard
//!
//! Expired entries linger until the next access, at which point they are
//! refreshed in place. Failed fetches are kept for the failure TTL so a
//! broken source is not hammered by every caller.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::{Mutex, RwLockWriteGuard};

use crate::error::{CacheError, Result};
use crate::lru::{BatchFetch, EvictCallback, Fetch, Lru, Slot, SlotState, Target};

// == Lazy Shard ==
/// Single cache shard with inline expiry.
///
/// The structural mutex guards only map lookups and insertions; a miss
/// resolves under the slot's own lock, so slow fetches never block the
/// shard for unrelated keys.
pub struct LazyLru<V> {
    core: Mutex<LruCache<String, Arc<Slot<V>>>>,
    success_ttl: Duration,
    failure_ttl: Duration,
    target: Arc<dyn Target>,
    on_evict: Option<EvictCallback>,
}

impl<V: Clone + Send + Sync> LazyLru<V> {
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

    /// Runs the fetch while holding the slot write lock, stores the
    /// outcome with its TTL, and reports the counter after the lock is
    /// released.
    fn resolve(&self, mut state: RwLockWriteGuard<'_, SlotState<V>>, fetch: Fetch<'_, V>) -> Result<V> {
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
                self.target.incr_get_failed();
                Err(err)
            }
        }
    }

    /// Serves a resident slot, refreshing it in place when its deadline
    /// has passed (or when a producer panic left it pending).
    fn read_or_refresh(&self, slot: &Arc<Slot<V>>, fetch: Fetch<'_, V>) -> Result<V> {
        {
            let state = slot.state.read();
            if state.is_live() {
                let outcome = state.outcome();
                drop(state);
                self.target.incr_get_hit();
                return outcome;
            }
        }

        let state = slot.state.write();
        if state.is_live() {
            // Another caller refreshed the slot while we queued for the
            // write lock.
            let outcome = state.outcome();
            drop(state);
            self.target.incr_get_hit();
            return outcome;
        }
        self.resolve(state, fetch)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.core.lock().len()
    }
}

impl<V: Clone + Send + Sync> Lru<V> for LazyLru<V> {
    fn get(&self, key: &str, fetch: Fetch<'_, V>) -> Result<V> {
        let mut core = self.core.lock();
        if let Some(existing) = core.get(key) {
            let slot = Arc::clone(existing);
            drop(core);
            return self.read_or_refresh(&slot, fetch);
        }

        // Cold key: insert a pending slot and claim its write lock before
        // the structural lock is released, so later arrivals queue on the
        // slot instead of racing the fetch.
        let slot = Arc::new(Slot::pending());
        let state = slot.state.write();
        if let Some((evicted, _)) = core.push(key.to_string(), Arc::clone(&slot)) {
            if evicted != key {
                self.notify_evict(&evicted);
            }
        }
        drop(core);
        self.resolve(state, fetch)
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
                Seen::Stale => misses.push(key.clone()),
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
                                // Requested but absent from the batch
                                // result: an individual failure.
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
