//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// The enum is `Clone` so that a single fetch outcome can be stored in a
/// slot and handed to every caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Rejected configuration at construction time
    #[error("invalid cache configuration: {0}")]
    Config(String),

    /// Error returned by a user-supplied fetcher, passed through verbatim
    #[error("{0}")]
    Fetch(Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// Dynamic value could not be downcast to the requested type
    #[error("type mismatch: expected {expected}")]
    TypeMismatch {
        /// Name of the type the caller asked for
        expected: &'static str,
    },
}

impl CacheError {
    /// Builds a configuration error from any message.
    pub fn config(msg: impl Into<String>) -> Self {
        CacheError::Config(msg.into())
    }

    /// Wraps a fetcher error.
    ///
    /// The original error is kept behind an `Arc` and is what `Display`
    /// and `source` report; the cache never rewrites it.
    pub fn fetch(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        CacheError::Fetch(Arc::from(err.into()))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display_is_passthrough() {
        let err = CacheError::fetch("connection refused");
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn test_fetch_error_clones_share_source() {
        let err = CacheError::fetch("boom");
        let cloned = err.clone();
        match (&err, &cloned) {
            (CacheError::Fetch(a), CacheError::Fetch(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected fetch errors"),
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = CacheError::config("slot capacity must be non-zero");
        assert_eq!(
            err.to_string(),
            "invalid cache configuration: slot capacity must be non-zero"
        );
    }
}
