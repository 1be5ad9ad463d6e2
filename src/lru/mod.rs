//! Shard LRU Module
//!
//! Fixed-capacity key/value shards with per-key TTL, single-flight fetch
//! on miss, and LRU eviction, plus the sharded router that fans a key
//! space out over many independently locked shards.

mod expiration;
mod lazy;
mod slots;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::error::Result;

pub use expiration::ExpirationLru;
pub use lazy::LazyLru;
pub use slots::SlotLru;

// == Fetcher And Callback Aliases ==
/// Closure invoked to produce a value on a cache miss.
pub type Fetch<'a, V> = Box<dyn FnOnce() -> Result<V> + 'a>;

/// Closure invoked with the missing keys of a batch lookup. It may be
/// called once per shard holding part of the batch.
pub type BatchFetch<'a, V> = Box<dyn Fn(Vec<String>) -> Result<HashMap<String, V>> + 'a>;

/// Callback invoked with the key of an entry removed by capacity or TTL
/// pressure. Explicit deletes never trigger it.
///
/// The callback runs while the shard's structural lock is held, so it must
/// not call back into the same shard.
pub type EvictCallback = Arc<dyn Fn(&str) + Send + Sync>;

// == Lru Trait ==
/// Common contract of a cache shard.
///
/// Implemented by the single-shard engines and by the router, so the
/// coordinator can hold either behind one object.
pub trait Lru<V>: Send + Sync {
    /// Returns the cached outcome for `key`, invoking `fetch` on miss.
    ///
    /// Concurrent callers for the same cold key block until the single
    /// in-flight fetch resolves and then observe its outcome.
    fn get(&self, key: &str, fetch: Fetch<'_, V>) -> Result<V>;

    /// Serves cached keys and fetches the rest in one batch call.
    fn get_batch(&self, keys: &[String], fetch: BatchFetch<'_, V>) -> Result<HashMap<String, V>>;

    /// Unconditionally stores `value` under `key` with the success TTL.
    fn set(&self, key: &str, value: V);

    /// Refreshes `key` only if it is already resident. Returns whether it
    /// was.
    fn set_if_present(&self, key: &str, value: V) -> bool;

    /// Removes `key`. Returns whether it was resident.
    fn del(&self, key: &str) -> bool;

    /// Releases shard resources. Idempotent.
    fn stop(&self);
}

// == Target Trait ==
/// Receiver for the five cache counters.
///
/// Implementations must be thread-safe; the cache calls them without
/// holding any of its own locks.
pub trait Target: Send + Sync {
    /// A lookup was served from the cache, whatever its stored outcome.
    fn incr_get_hit(&self);
    /// A miss whose fetch succeeded.
    fn incr_get_success(&self);
    /// A miss whose fetch failed.
    fn incr_get_failed(&self);
    /// An explicit delete that found the key.
    fn incr_del_hit(&self);
    /// An explicit delete that found nothing.
    fn incr_del_not_found(&self);
}

/// Target that discards every counter. The default when no stats receiver
/// is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTarget;

impl Target for NoopTarget {
    fn incr_get_hit(&self) {}
    fn incr_get_success(&self) {}
    fn incr_get_failed(&self) {}
    fn incr_del_hit(&self) {}
    fn incr_del_not_found(&self) {}
}

// == Key Hash ==
/// 64-bit FNV-1a over the key bytes. Stable across processes, used for
/// shard selection.
pub fn lru_string_hash(key: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

// == Value Slot ==
/// Per-key container shared between the shard map and its readers.
///
/// The state lock is the single-flight mechanism: the producer holds the
/// write half across its fetch, readers queue on the read half.
pub(crate) struct Slot<V> {
    pub(crate) state: RwLock<SlotState<V>>,
}

pub(crate) enum SlotState<V> {
    /// A fetch is in flight; only observable after a producer panic.
    Pending,
    Ready { value: V, deadline: Instant },
    Failed { err: crate::error::CacheError, deadline: Instant },
}

impl<V> Slot<V> {
    pub(crate) fn pending() -> Self {
        Slot {
            state: RwLock::new(SlotState::Pending),
        }
    }

    pub(crate) fn ready(value: V, deadline: Instant) -> Self {
        Slot {
            state: RwLock::new(SlotState::Ready { value, deadline }),
        }
    }
}

impl<V: Clone> SlotState<V> {
    /// Whether the stored outcome is still servable.
    pub(crate) fn is_live(&self) -> bool {
        match self {
            SlotState::Pending => false,
            SlotState::Ready { deadline, .. } | SlotState::Failed { deadline, .. } => {
                *deadline > Instant::now()
            }
        }
    }

    /// The stored outcome. Callers check liveness (or resolve the slot)
    /// first; a pending slot here is a bug.
    pub(crate) fn outcome(&self) -> Result<V> {
        match self {
            SlotState::Ready { value, .. } => Ok(value.clone()),
            SlotState::Failed { err, .. } => Err(err.clone()),
            SlotState::Pending => unreachable!("slot outcome read while fetch in flight"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(lru_string_hash("key1"), lru_string_hash("key1"));
    }

    #[test]
    fn test_hash_reference_vectors() {
        // FNV-1a test vectors.
        assert_eq!(lru_string_hash(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(lru_string_hash("a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_slot_liveness() {
        let now = Instant::now();
        let live = SlotState::Ready {
            value: 1u32,
            deadline: now + std::time::Duration::from_secs(60),
        };
        assert!(live.is_live());

        let stale = SlotState::Ready {
            value: 1u32,
            deadline: now,
        };
        assert!(!stale.is_live());

        assert!(!SlotState::<u32>::Pending.is_live());
    }
}
