//! Key Linkage Module
//!
//! Symmetric adjacency between cache keys, sharded by key hash so that
//! registering or draining one key only ever locks single shards.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::lru::lru_string_hash;

// == Linkage Graph ==
/// Sharded, mutually associated key sets.
///
/// `link(a, [b])` records `b` in `a`'s set and `a` in `b`'s set. `del`
/// drains only the named key's own set; the reverse references it leaves
/// behind point at an already-absent key and are skipped by the
/// cascade's visited set.
pub struct LinkGraph {
    slots: Vec<Mutex<HashMap<String, HashSet<String>>>>,
}

impl LinkGraph {
    /// Creates a graph with `slot_num` independently locked shards.
    ///
    /// # Panics
    /// Panics if `slot_num` is zero.
    pub fn new(slot_num: usize) -> Self {
        assert!(slot_num > 0, "slot_num must be greater than 0");
        Self {
            slots: (0..slot_num).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn slot(&self, key: &str) -> &Mutex<HashMap<String, HashSet<String>>> {
        &self.slots[(lru_string_hash(key) % self.slots.len() as u64) as usize]
    }

    /// Associates `key` with every entry of `others`, in both directions.
    /// Duplicates are idempotent; an empty `others` is a no-op.
    ///
    /// Shard locks are taken one at a time, never nested.
    pub fn link(&self, key: &str, others: &[String]) {
        if others.is_empty() {
            return;
        }

        {
            let mut slot = self.slot(key).lock();
            let adjacent = slot.entry(key.to_string()).or_default();
            for other in others {
                adjacent.insert(other.clone());
            }
        }

        for other in others {
            let mut slot = self.slot(other).lock();
            slot.entry(other.clone()).or_default().insert(key.to_string());
        }
    }

    /// Removes `key`'s own adjacency set and returns it; empty when the
    /// key was never linked. Neighbours are not walked and their sets are
    /// not touched.
    pub fn del(&self, key: &str) -> HashSet<String> {
        self.slot(key).lock().remove(key).unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn neighbors(&self, key: &str) -> HashSet<String> {
        self.slot(key).lock().get(key).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[&str]) -> HashSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_link_is_symmetric() {
        let graph = LinkGraph::new(4);
        graph.link("a", &["b".to_string(), "c".to_string()]);

        assert_eq!(graph.neighbors("a"), set(&["b", "c"]));
        assert_eq!(graph.neighbors("b"), set(&["a"]));
        assert_eq!(graph.neighbors("c"), set(&["a"]));
    }

    #[test]
    fn test_link_accumulates_and_dedupes() {
        let graph = LinkGraph::new(4);
        graph.link("a", &["b".to_string()]);
        graph.link("a", &["b".to_string(), "c".to_string()]);

        assert_eq!(graph.neighbors("a"), set(&["b", "c"]));
        assert_eq!(graph.neighbors("b"), set(&["a"]));
    }

    #[test]
    fn test_link_empty_is_noop() {
        let graph = LinkGraph::new(4);
        graph.link("a", &[]);

        assert!(graph.del("a").is_empty());
    }

    #[test]
    fn test_del_returns_direct_neighbours_only() {
        let graph = LinkGraph::new(4);
        graph.link("a", &["b".to_string()]);
        graph.link("b", &["c".to_string()]);

        // One hop from "a": just "b"; the graph is not walked.
        assert_eq!(graph.del("a"), set(&["b"]));

        // "b" keeps a dangling reference to "a" alongside "c".
        assert_eq!(graph.del("b"), set(&["a", "c"]));
    }

    #[test]
    fn test_del_absent_key_is_empty() {
        let graph = LinkGraph::new(4);
        assert!(graph.del("missing").is_empty());
    }

    #[test]
    fn test_del_is_single_shot() {
        let graph = LinkGraph::new(4);
        graph.link("a", &["b".to_string()]);

        assert_eq!(graph.del("a"), set(&["b"]));
        assert!(graph.del("a").is_empty());
    }

    #[test]
    fn test_self_link_is_stored() {
        let graph = LinkGraph::new(4);
        graph.link("a", &["a".to_string()]);

        assert_eq!(graph.neighbors("a"), set(&["a"]));
    }
}
