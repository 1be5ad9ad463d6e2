//! localcache - process-local caching with linked-key invalidation
//!
//! An in-memory cache that sits in front of slower data sources. Callers
//! hand over a key and a fetcher closure; the cache returns the current
//! value, computing and memoizing it on miss with a single-flight
//! guarantee. Keys may additionally be declared mutually associated so
//! that deleting any one of them cascades to the rest.
//!
//! Internally the key space is sharded over independently locked LRU
//! shards with per-entry TTLs. Two eviction disciplines are available:
//! lazy expiry (stale entries are refreshed on access, failures are
//! briefly negative-cached) and active expiry (stale entries are purged
//! as soon as a read observes them, failures are never kept).
//!
//! ```
//! use std::time::Duration;
//! use localcache::{LocalCache, Options};
//!
//! let cache: LocalCache<String> = LocalCache::new(
//!     Options::default()
//!         .with_local_slot_num(16)
//!         .with_local_slot_capacity(1024)
//!         .with_success_ttl(Duration::from_secs(60)),
//! )
//! .unwrap();
//!
//! let user = cache.get("user:42", || Ok("alice".to_string())).unwrap();
//! assert_eq!(user, "alice");
//!
//! // Tie the profile entry to its owner: deleting either removes both.
//! let profile = cache
//!     .get_with_links(
//!         "user:42:profile",
//!         || Ok("dark-mode".to_string()),
//!         &["user:42".to_string()],
//!     )
//!     .unwrap();
//! assert_eq!(profile, "dark-mode");
//!
//! cache.del(&["user:42".to_string()]);
//! cache.stop();
//! ```

pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod link;
pub mod lru;
pub mod stats;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use cache::LocalCache;
pub use config::{CacheConfig, EvictionMode, Options, PreDeleteHook};
pub use convert::any_value;
pub use error::{CacheError, Result};
pub use link::LinkGraph;
pub use lru::{lru_string_hash, Lru, NoopTarget, Target};
pub use stats::{CacheStats, StatsSnapshot};
