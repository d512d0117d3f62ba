//! Distributed cache with local fallback.
//!
//! [`FallbackCache`] fronts a [`RemoteBackend`] (Redis, Memcached, ...) and
//! absorbs every backend failure. After `failure_threshold` consecutive errors
//! it marks itself degraded and serves everything from its [`LocalCache`] for
//! the rest of the process lifetime.
//!
//! Invalidations (`delete`, `delete_pattern`) are always applied to the local
//! map as well, so a value written locally during a transient outage can never
//! resurface once the cache degrades. A failed remote invalidation degrades
//! the cache immediately: the remote may still hold the invalidated value and
//! must not serve it again.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::local::LocalCache;
use super::{CacheStats, ScoreCache};

/// Errors raised by a remote cache backend. Never surfaced to callers.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend unreachable.
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    /// Backend returned something unusable.
    #[error("Cache backend protocol error: {0}")]
    Protocol(String),
}

/// Contract for a distributed cache client.
///
/// Implementations must treat a read after expiry as a miss.
pub trait RemoteBackend: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Fetch a value.
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store a value with a TTL.
    fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheError>;

    /// Remove one key.
    fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every key matching a glob pattern, returning the count.
    fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError>;
}

/// Remote-first cache that degrades to a local map.
pub struct FallbackCache {
    remote: Option<Arc<dyn RemoteBackend>>,
    local: Arc<LocalCache>,
    default_ttl: Duration,
    failure_threshold: u32,
    consecutive_failures: AtomicU32,
    backend_errors: AtomicU64,
    degraded: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FallbackCache {
    /// Front `remote` with a local fallback.
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteBackend>, default_ttl: Duration, failure_threshold: u32) -> Self {
        Self {
            remote: Some(remote),
            local: Arc::new(LocalCache::new(default_ttl)),
            default_ttl,
            failure_threshold: failure_threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
            backend_errors: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// A cache with no remote configured: permanently local.
    #[must_use]
    pub fn local_only(default_ttl: Duration) -> Self {
        Self {
            remote: None,
            local: Arc::new(LocalCache::new(default_ttl)),
            default_ttl,
            failure_threshold: 1,
            consecutive_failures: AtomicU32::new(0),
            backend_errors: AtomicU64::new(0),
            degraded: AtomicBool::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Shared handle to the local map, for the sweeper.
    #[must_use]
    pub fn local(&self) -> Arc<LocalCache> {
        Arc::clone(&self.local)
    }

    /// Returns true once the remote backend has been abandoned.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn active_remote(&self) -> Option<&Arc<dyn RemoteBackend>> {
        if self.is_degraded() {
            return None;
        }
        self.remote.as_ref()
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    fn record_failure(&self, op: &'static str, err: &CacheError) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        let backend = self.remote.as_ref().map_or("none", |r| r.name());
        warn!(backend, op, failures, error = %err, "cache backend call failed");
        if failures >= self.failure_threshold && !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(backend, failures, "cache degraded to local map");
        }
    }

    fn record_invalidation_failure(&self, op: &'static str, err: &CacheError) {
        self.record_failure(op, err);
        if !self.degraded.swap(true, Ordering::AcqRel) {
            let backend = self.remote.as_ref().map_or("none", |r| r.name());
            warn!(backend, op, "remote invalidation failed, cache degraded to local map");
        }
    }

    fn count(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl ScoreCache for FallbackCache {
    fn get(&self, key: &str) -> Option<Value> {
        let found = match self.active_remote() {
            Some(remote) => match remote.get(key) {
                Ok(v) => {
                    self.record_success();
                    v
                }
                Err(e) => {
                    self.record_failure("get", &e);
                    self.local.get(key)
                }
            },
            None => self.local.get(key),
        };
        self.count(found.is_some());
        debug!(key, hit = found.is_some(), "cache lookup");
        found
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if let Some(remote) = self.active_remote() {
            match remote.set(key, &value, ttl) {
                Ok(()) => {
                    self.record_success();
                    return;
                }
                Err(e) => self.record_failure("set", &e),
            }
        }
        self.local.set(key, value, Some(ttl));
    }

    fn delete(&self, key: &str) {
        self.local.delete(key);
        if let Some(remote) = self.active_remote() {
            match remote.delete(key) {
                Ok(()) => self.record_success(),
                Err(e) => self.record_invalidation_failure("delete", &e),
            }
        }
    }

    fn delete_pattern(&self, pattern: &str) -> usize {
        let local = self.local.delete_pattern(pattern);
        let remote = match self.active_remote() {
            Some(remote) => match remote.delete_pattern(pattern) {
                Ok(n) => {
                    self.record_success();
                    n
                }
                Err(e) => {
                    self.record_invalidation_failure("delete_pattern", &e);
                    0
                }
            },
            None => 0,
        };
        local + remote
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            degraded: self.is_degraded(),
            local_entries: self.local.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex;

    use serde_json::json;

    /// Remote backed by a map that can be switched to fail every call.
    #[derive(Default)]
    struct FlakyRemote {
        map: Mutex<HashMap<String, Value>>,
        failing: AtomicBool,
        calls: AtomicU64,
    }

    impl FlakyRemote {
        fn check(&self) -> Result<(), CacheError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.failing.load(Ordering::Relaxed) {
                Err(CacheError::Unavailable("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl RemoteBackend for FlakyRemote {
        fn name(&self) -> &str {
            "flaky"
        }

        fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
            self.check()?;
            Ok(self.map.lock().unwrap().get(key).cloned())
        }

        fn set(&self, key: &str, value: &Value, _ttl: Duration) -> Result<(), CacheError> {
            self.check()?;
            self.map.lock().unwrap().insert(key.to_string(), value.clone());
            Ok(())
        }

        fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.check()?;
            self.map.lock().unwrap().remove(key);
            Ok(())
        }

        fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
            self.check()?;
            let re = crate::cache::glob::compile(pattern)
                .map_err(|e| CacheError::Protocol(e.to_string()))?;
            let mut map = self.map.lock().unwrap();
            let before = map.len();
            map.retain(|k, _| !re.is_match(k));
            Ok(before - map.len())
        }
    }

    #[test]
    fn healthy_remote_serves_reads() {
        let remote = Arc::new(FlakyRemote::default());
        let cache = FallbackCache::new(remote.clone(), Duration::from_secs(300), 3);

        cache.set("score:a", json!(10), None);
        assert_eq!(cache.get("score:a"), Some(json!(10)));
        assert!(cache.local().is_empty());
        assert!(!cache.is_degraded());
    }

    #[test]
    fn degrades_after_consecutive_failures_without_erroring() {
        let remote = Arc::new(FlakyRemote::default());
        let cache = FallbackCache::new(remote.clone(), Duration::from_secs(300), 3);
        remote.failing.store(true, Ordering::Relaxed);

        assert_eq!(cache.get("x"), None);
        assert_eq!(cache.get("x"), None);
        assert!(!cache.is_degraded());
        assert_eq!(cache.get("x"), None);
        assert!(cache.is_degraded());

        let calls_at_degrade = remote.calls.load(Ordering::Relaxed);
        cache.set("score:a", json!(5), None);
        assert_eq!(cache.get("score:a"), Some(json!(5)));
        // Degraded caches never touch the remote again.
        assert_eq!(remote.calls.load(Ordering::Relaxed), calls_at_degrade);

        let stats = cache.stats();
        assert!(stats.degraded);
        assert_eq!(stats.backend_errors, 3);
    }

    #[test]
    fn success_resets_failure_streak() {
        let remote = Arc::new(FlakyRemote::default());
        let cache = FallbackCache::new(remote.clone(), Duration::from_secs(300), 2);

        remote.failing.store(true, Ordering::Relaxed);
        cache.get("a");
        remote.failing.store(false, Ordering::Relaxed);
        cache.get("a");
        remote.failing.store(true, Ordering::Relaxed);
        cache.get("a");
        assert!(!cache.is_degraded());
    }

    #[test]
    fn invalidation_reaches_local_copy_written_during_outage() {
        let remote = Arc::new(FlakyRemote::default());
        let cache = FallbackCache::new(remote.clone(), Duration::from_secs(300), 2);

        // One failed set lands in the local map.
        remote.failing.store(true, Ordering::Relaxed);
        cache.set("score:a", json!(1), None);
        remote.failing.store(false, Ordering::Relaxed);

        // Healthy delete must clear the local copy too.
        cache.delete("score:a");

        remote.failing.store(true, Ordering::Relaxed);
        cache.get("other");
        cache.get("other");
        assert!(cache.is_degraded());
        assert_eq!(cache.get("score:a"), None);
    }

    #[test]
    fn failed_remote_delete_never_serves_the_old_value() {
        let remote = Arc::new(FlakyRemote::default());
        let cache = FallbackCache::new(remote.clone(), Duration::from_secs(300), 3);
        cache.set("score:a", json!(10), None);

        remote.failing.store(true, Ordering::Relaxed);
        cache.delete("score:a");
        remote.failing.store(false, Ordering::Relaxed);

        // The remote still holds the value; it must not come back.
        assert_eq!(remote.map.lock().unwrap().get("score:a"), Some(&json!(10)));
        assert!(cache.is_degraded());
        assert_eq!(cache.get("score:a"), None);
    }

    #[test]
    fn failed_remote_pattern_delete_never_serves_old_values() {
        let remote = Arc::new(FlakyRemote::default());
        let cache = FallbackCache::new(remote.clone(), Duration::from_secs(300), 3);
        cache.set("leaderboard:global", json!([1, 2]), None);
        cache.set("leaderboard:senator", json!([3]), None);

        remote.failing.store(true, Ordering::Relaxed);
        assert_eq!(cache.delete_pattern("leaderboard:*"), 0);
        remote.failing.store(false, Ordering::Relaxed);

        assert!(cache.is_degraded());
        assert_eq!(cache.get("leaderboard:global"), None);
        assert_eq!(cache.get("leaderboard:senator"), None);
        assert_eq!(cache.stats().backend_errors, 1);
    }

    #[test]
    fn local_only_is_degraded_from_start() {
        let cache = FallbackCache::local_only(Duration::from_secs(300));
        assert!(cache.is_degraded());
        cache.set("leaderboard:global", json!([]), None);
        assert_eq!(cache.delete_pattern("leaderboard:*"), 1);
    }
}
