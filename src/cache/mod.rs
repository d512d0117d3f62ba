//! Score cache.
//!
//! Engines only see the [`ScoreCache`] trait. The instance is chosen once at
//! startup and passed in explicitly:
//! - [`LocalCache`] for single-process deployments and tests
//! - [`FallbackCache`] in front of a distributed [`RemoteBackend`]
//!
//! Cache operations are infallible from the caller's point of view: backend
//! failures are absorbed and show up only in [`CacheStats`].

mod fallback;
pub mod glob;
pub mod keys;
mod local;
mod sweeper;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub use fallback::{CacheError, FallbackCache, RemoteBackend};
pub use local::LocalCache;
pub use sweeper::CacheSweeper;

/// Default TTL for cached scores.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Counters describing cache behaviour since startup.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub backend_errors: u64,
    pub degraded: bool,
    pub local_entries: usize,
}

/// Key-value store with per-key TTL.
///
/// A read after expiry is a miss. Implementations never surface backend
/// errors.
pub trait ScoreCache: Send + Sync {
    /// Fetch a live value.
    fn get(&self, key: &str) -> Option<Value>;

    /// Store a value; `None` uses the default TTL.
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>);

    /// Remove one key.
    fn delete(&self, key: &str);

    /// Remove every key matching a glob pattern, returning the count removed.
    fn delete_pattern(&self, pattern: &str) -> usize;

    /// Snapshot of the counters.
    fn stats(&self) -> CacheStats;
}

/// Typed JSON helpers over any [`ScoreCache`].
pub trait ScoreCacheExt: ScoreCache {
    /// Fetch and deserialize. A value that no longer deserializes is dropped
    /// and treated as a miss.
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache entry");
                self.delete(key);
                None
            }
        }
    }

    /// Serialize and store.
    fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v, ttl),
            Err(e) => warn!(key, error = %e, "failed to serialize for cache"),
        }
    }
}

impl<C: ScoreCache + ?Sized> ScoreCacheExt for C {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        score: f64,
        label: String,
    }

    #[test]
    fn typed_round_trip_through_trait_object() {
        let cache: Box<dyn ScoreCache> = Box::new(LocalCache::default());
        let sample = Sample {
            score: 42.5,
            label: "rising".to_string(),
        };
        cache.set_as("momentum:x", &sample, None);
        assert_eq!(cache.get_as::<Sample>("momentum:x"), Some(sample));
    }

    #[test]
    fn undecodable_entry_is_dropped() {
        let cache = LocalCache::default();
        cache.set("momentum:x", serde_json::json!("not a struct"), None);
        assert_eq!(cache.get_as::<Sample>("momentum:x"), None);
        assert!(cache.is_empty());
    }
}
