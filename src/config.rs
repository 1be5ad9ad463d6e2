//! Configuration Module
//!
//! Construction options for the cache plus a serde-friendly mirror for
//! embedding applications that keep cache settings in their own config
//! files. The cache itself reads nothing from the environment.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::lru::{NoopTarget, Target};

// == Defaults ==
const DEFAULT_LOCAL_SLOT_NUM: usize = 500;
const DEFAULT_LOCAL_SLOT_CAPACITY: usize = 20_000;
const DEFAULT_LINK_SLOT_NUM: usize = 500;
const DEFAULT_SUCCESS_TTL: Duration = Duration::from_secs(60);
const DEFAULT_FAILURE_TTL: Duration = Duration::from_secs(5);

/// Hook invoked with the full key batch before an explicit delete
/// mutates the cache.
pub type PreDeleteHook = Box<dyn Fn(&[String]) + Send + Sync>;

// == Eviction Mode ==
/// How expired entries leave the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionMode {
    /// Expired entries are purged as soon as a read observes them and
    /// the removal is reported to the eviction callback. Failed fetches
    /// are never kept.
    Active,
    /// Expired entries linger until the next access and are refreshed in
    /// place. Failed fetches are kept for the failure TTL.
    #[default]
    Lazy,
}

// == Options ==
/// Construction options for [`LocalCache`](crate::LocalCache).
///
/// Defaults match a read-heavy service-side cache: 500 local shards of
/// 20,000 entries, 500 linkage shards, one minute of success TTL and
/// five seconds of failure TTL under lazy expiry.
pub struct Options {
    pub(crate) local_slot_num: usize,
    pub(crate) local_slot_capacity: usize,
    pub(crate) link_slot_num: usize,
    pub(crate) success_ttl: Duration,
    pub(crate) failure_ttl: Duration,
    pub(crate) eviction_mode: EvictionMode,
    pub(crate) target: Arc<dyn Target>,
    pub(crate) hooks: Vec<PreDeleteHook>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            local_slot_num: DEFAULT_LOCAL_SLOT_NUM,
            local_slot_capacity: DEFAULT_LOCAL_SLOT_CAPACITY,
            link_slot_num: DEFAULT_LINK_SLOT_NUM,
            success_ttl: DEFAULT_SUCCESS_TTL,
            failure_ttl: DEFAULT_FAILURE_TTL,
            eviction_mode: EvictionMode::default(),
            target: Arc::new(NoopTarget),
            hooks: Vec::new(),
        }
    }
}

impl Options {
    /// Sets the number of local cache shards. Zero disables local
    /// caching entirely; every `get` then calls its fetcher directly.
    pub fn with_local_slot_num(mut self, slot_num: usize) -> Self {
        self.local_slot_num = slot_num;
        self
    }

    /// Sets the per-shard entry capacity.
    pub fn with_local_slot_capacity(mut self, capacity: usize) -> Self {
        self.local_slot_capacity = capacity;
        self
    }

    /// Sets the number of linkage shards. Zero disables key linkage;
    /// link arguments are then ignored and deletes never cascade.
    pub fn with_link_slot_num(mut self, slot_num: usize) -> Self {
        self.link_slot_num = slot_num;
        self
    }

    /// Sets the TTL applied to successfully fetched values.
    pub fn with_success_ttl(mut self, ttl: Duration) -> Self {
        self.success_ttl = ttl;
        self
    }

    /// Sets the TTL applied to failed fetches in lazy mode.
    pub fn with_failure_ttl(mut self, ttl: Duration) -> Self {
        self.failure_ttl = ttl;
        self
    }

    /// Selects the eviction discipline.
    pub fn with_eviction_mode(mut self, mode: EvictionMode) -> Self {
        self.eviction_mode = mode;
        self
    }

    /// Installs a receiver for the cache counters.
    pub fn with_stats_target(mut self, target: Arc<dyn Target>) -> Self {
        self.target = target;
        self
    }

    /// Appends a pre-delete hook. Hooks run in registration order, each
    /// receiving the full key batch, before any cache mutation.
    pub fn with_pre_delete_hook(mut self, hook: impl Fn(&[String]) + Send + Sync + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Disables local caching. Shorthand for a zero shard count.
    pub fn without_local(self) -> Self {
        self.with_local_slot_num(0)
    }

    /// Disables key linkage. Shorthand for a zero linkage shard count.
    pub fn without_link(self) -> Self {
        self.with_link_slot_num(0)
    }

    /// Rejects option combinations the cache cannot run with.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.local_slot_num == 0 {
            return Ok(());
        }
        if self.local_slot_capacity == 0 {
            return Err(CacheError::config(
                "local slot capacity must be non-zero when local caching is enabled",
            ));
        }
        if self.success_ttl.is_zero() {
            return Err(CacheError::config("success TTL must be non-zero"));
        }
        if self.eviction_mode == EvictionMode::Lazy && self.failure_ttl.is_zero() {
            return Err(CacheError::config(
                "failure TTL must be non-zero in lazy eviction mode",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("local_slot_num", &self.local_slot_num)
            .field("local_slot_capacity", &self.local_slot_capacity)
            .field("link_slot_num", &self.link_slot_num)
            .field("success_ttl", &self.success_ttl)
            .field("failure_ttl", &self.failure_ttl)
            .field("eviction_mode", &self.eviction_mode)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

// == Cache Config ==
/// Declarative mirror of [`Options`] with seconds-valued TTLs, for
/// applications that deserialize cache settings alongside their own
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of local cache shards; zero disables local caching
    pub local_slot_num: usize,
    /// Per-shard entry capacity
    pub local_slot_capacity: usize,
    /// Number of linkage shards; zero disables linkage
    pub link_slot_num: usize,
    /// TTL in seconds for successful fetches
    pub success_ttl_secs: u64,
    /// TTL in seconds for failed fetches (lazy mode)
    pub failure_ttl_secs: u64,
    /// Eviction discipline
    pub eviction_mode: EvictionMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_slot_num: DEFAULT_LOCAL_SLOT_NUM,
            local_slot_capacity: DEFAULT_LOCAL_SLOT_CAPACITY,
            link_slot_num: DEFAULT_LINK_SLOT_NUM,
            success_ttl_secs: DEFAULT_SUCCESS_TTL.as_secs(),
            failure_ttl_secs: DEFAULT_FAILURE_TTL.as_secs(),
            eviction_mode: EvictionMode::default(),
        }
    }
}

impl CacheConfig {
    /// Whether this configuration enables local caching at all.
    pub fn enabled(&self) -> bool {
        self.local_slot_num > 0 && self.local_slot_capacity > 0
    }

    /// Success TTL as a duration.
    pub fn success_ttl(&self) -> Duration {
        Duration::from_secs(self.success_ttl_secs)
    }

    /// Failure TTL as a duration.
    pub fn failure_ttl(&self) -> Duration {
        Duration::from_secs(self.failure_ttl_secs)
    }

    /// Converts into construction options. Stats targets and pre-delete
    /// hooks are code-level concerns and are attached afterwards.
    pub fn into_options(self) -> Options {
        Options::default()
            .with_local_slot_num(self.local_slot_num)
            .with_local_slot_capacity(self.local_slot_capacity)
            .with_link_slot_num(self.link_slot_num)
            .with_success_ttl(self.success_ttl())
            .with_failure_ttl(self.failure_ttl())
            .with_eviction_mode(self.eviction_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let opts = Options::default();
        assert_eq!(opts.local_slot_num, 500);
        assert_eq!(opts.local_slot_capacity, 20_000);
        assert_eq!(opts.link_slot_num, 500);
        assert_eq!(opts.success_ttl, Duration::from_secs(60));
        assert_eq!(opts.failure_ttl, Duration::from_secs(5));
        assert_eq!(opts.eviction_mode, EvictionMode::Lazy);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let opts = Options::default().with_local_slot_capacity(0);
        assert!(matches!(opts.validate(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_zero_success_ttl_is_rejected() {
        let opts = Options::default().with_success_ttl(Duration::ZERO);
        assert!(matches!(opts.validate(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_zero_failure_ttl_rejected_only_in_lazy_mode() {
        let lazy = Options::default().with_failure_ttl(Duration::ZERO);
        assert!(lazy.validate().is_err());

        let active = Options::default()
            .with_failure_ttl(Duration::ZERO)
            .with_eviction_mode(EvictionMode::Active);
        assert!(active.validate().is_ok());
    }

    #[test]
    fn test_disabled_local_skips_validation() {
        let opts = Options::default().without_local().with_local_slot_capacity(0);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_cache_config_roundtrip() {
        let config = CacheConfig {
            local_slot_num: 8,
            local_slot_capacity: 256,
            link_slot_num: 4,
            success_ttl_secs: 30,
            failure_ttl_secs: 2,
            eviction_mode: EvictionMode::Active,
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: CacheConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_cache_config_defaults_fill_missing_fields() {
        let parsed: CacheConfig = serde_json::from_str(r#"{"local_slot_num": 3}"#).unwrap();
        assert_eq!(parsed.local_slot_num, 3);
        assert_eq!(parsed.local_slot_capacity, 20_000);
        assert_eq!(parsed.eviction_mode, EvictionMode::Lazy);
        assert!(parsed.enabled());
    }

    #[test]
    fn test_cache_config_into_options() {
        let opts = CacheConfig {
            local_slot_num: 2,
            local_slot_capacity: 16,
            link_slot_num: 0,
            success_ttl_secs: 10,
            failure_ttl_secs: 1,
            eviction_mode: EvictionMode::Lazy,
        }
        .into_options();

        assert_eq!(opts.local_slot_num, 2);
        assert_eq!(opts.link_slot_num, 0);
        assert_eq!(opts.success_ttl, Duration::from_secs(10));
        assert!(opts.validate().is_ok());
    }
}
