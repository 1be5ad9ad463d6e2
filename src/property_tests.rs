//! Property-Based Tests
//!
//! Uses proptest to verify the structural invariants: shard capacity is
//! never exceeded, eviction follows recency order, and the linkage graph
//! stays symmetric under arbitrary link batches.

use proptest::prelude::*;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::link::LinkGraph;
use crate::lru::{LazyLru, Lru, NoopTarget};

// == Test Configuration ==
const TEST_CAPACITY: usize = 8;

// == Strategies ==
/// Generates cache keys from a small alphabet so operations collide.
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-e][0-9]".prop_map(|s| s)
}

fn value_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}".prop_map(|s| s)
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: String },
    Get { key: String },
    Del { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (key_strategy(), value_strategy()).prop_map(|(key, value)| CacheOp::Set { key, value }),
        key_strategy().prop_map(|key| CacheOp::Get { key }),
        key_strategy().prop_map(|key| CacheOp::Del { key }),
    ]
}

fn test_shard(capacity: usize) -> LazyLru<String> {
    LazyLru::new(
        NonZeroUsize::new(capacity).unwrap(),
        Duration::from_secs(300),
        Duration::from_secs(300),
        Arc::new(NoopTarget),
        None,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // A shard never holds more entries than its capacity, whatever the
    // operation sequence.
    #[test]
    fn prop_capacity_bound(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let shard = test_shard(TEST_CAPACITY);

        for op in ops {
            match op {
                CacheOp::Set { key, value } => shard.set(&key, value),
                CacheOp::Get { key } => {
                    let _ = shard.get(&key, Box::new(|| Ok("fetched".to_string())));
                }
                CacheOp::Del { key } => {
                    shard.del(&key);
                }
            }
            prop_assert!(shard.len() <= TEST_CAPACITY, "capacity exceeded");
        }
    }

    // Inserting capacity + 1 distinct keys with no intervening reads
    // evicts the first-inserted key first.
    #[test]
    fn prop_first_eviction_is_oldest(keys in prop::collection::hash_set(key_strategy(), TEST_CAPACITY + 1)) {
        let keys: Vec<String> = keys.into_iter().collect();
        let evicted: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&evicted);
        let shard = LazyLru::new(
            NonZeroUsize::new(TEST_CAPACITY).unwrap(),
            Duration::from_secs(300),
            Duration::from_secs(300),
            Arc::new(NoopTarget),
            Some(Arc::new(move |key: &str| record.lock().push(key.to_string()))),
        );

        for key in &keys {
            shard.set(key, "v".to_string());
        }

        let evicted = evicted.lock();
        prop_assert_eq!(evicted.len(), 1);
        prop_assert_eq!(&evicted[0], &keys[0]);
    }

    // Whatever link batches are applied, membership stays symmetric:
    // b is adjacent to a exactly when a is adjacent to b.
    #[test]
    fn prop_linkage_symmetry(batches in prop::collection::vec(
        (key_strategy(), prop::collection::vec(key_strategy(), 0..4)),
        1..20,
    )) {
        let graph = LinkGraph::new(4);
        let mut mentioned: Vec<String> = Vec::new();

        for (key, others) in &batches {
            graph.link(key, others);
            mentioned.push(key.clone());
            mentioned.extend(others.iter().cloned());
        }

        for a in &mentioned {
            for b in &mentioned {
                let forward = graph.neighbors(a).contains(b);
                let backward = graph.neighbors(b).contains(a);
                // Self-loops only exist when explicitly declared, and
                // symmetry is trivially true for them.
                if a != b {
                    prop_assert_eq!(forward, backward, "asymmetric edge {} <-> {}", a, b);
                }
            }
        }
    }
}
