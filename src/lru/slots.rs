//! Sharded Router
//!
//! Stateless fan-out over independently locked shards. The shard for a
//! key is chosen by hash, so all operations on one key always land on
//! the same shard and shards never coordinate with each other.

use std::collections::HashMap;

use crate::error::{CacheError, Result};
use crate::lru::{BatchFetch, Fetch, Lru};

// == Slot Router ==
/// Routes every operation to `shards[hash(key) % n]` unchanged.
pub struct SlotLru<V> {
    shards: Vec<Box<dyn Lru<V>>>,
    hash: fn(&str) -> u64,
}

impl<V: Clone + Send + Sync> SlotLru<V> {
    /// Builds `slot_num` shards with the given factory.
    ///
    /// # Panics
    /// Panics if `slot_num` is zero.
    pub fn new(
        slot_num: usize,
        hash: fn(&str) -> u64,
        mut create: impl FnMut() -> Box<dyn Lru<V>>,
    ) -> Self {
        assert!(slot_num > 0, "slot_num must be greater than 0");
        let shards = (0..slot_num).map(|_| create()).collect();
        Self { shards, hash }
    }

    fn index(&self, key: &str) -> usize {
        ((self.hash)(key) % self.shards.len() as u64) as usize
    }

    fn shard(&self, key: &str) -> &dyn Lru<V> {
        &*self.shards[self.index(key)]
    }
}

impl<V: Clone + Send + Sync> Lru<V> for SlotLru<V> {
    fn get(&self, key: &str, fetch: Fetch<'_, V>) -> Result<V> {
        self.shard(key).get(key, fetch)
    }

    fn get_batch(&self, keys: &[String], fetch: BatchFetch<'_, V>) -> Result<HashMap<String, V>> {
        let mut partitions: Vec<Vec<String>> = vec![Vec::new(); self.shards.len()];
        for key in keys {
            partitions[self.index(key)].push(key.clone());
        }

        let mut merged = HashMap::with_capacity(keys.len());
        let mut first_err: Option<CacheError> = None;
        for (idx, partition) in partitions.into_iter().enumerate() {
            if partition.is_empty() {
                continue;
            }
            match self.shards[idx].get_batch(&partition, Box::new(|misses| fetch(misses))) {
                Ok(part) => merged.extend(part),
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(merged),
        }
    }

    fn set(&self, key: &str, value: V) {
        self.shard(key).set(key, value);
    }

    fn set_if_present(&self, key: &str, value: V) -> bool {
        self.shard(key).set_if_present(key, value)
    }

    fn del(&self, key: &str) -> bool {
        self.shard(key).del(key)
    }

    fn stop(&self) {
        for shard in &self.shards {
            shard.stop();
        }
    }
}
