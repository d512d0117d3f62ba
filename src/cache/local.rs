//! In-process TTL map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use super::{glob, CacheStats, ScoreCache};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe local cache with per-key expiry.
///
/// Expired entries are never returned; they linger in memory only until the
/// next [`LocalCache::sweep_expired`] or overwrite.
#[derive(Debug)]
pub struct LocalCache {
    entries: RwLock<HashMap<String, Entry>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LocalCache {
    /// Create an empty cache with the given default TTL.
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Evict every expired entry, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let Ok(mut guard) = self.entries.write() else {
            warn!("local cache lock poisoned during sweep");
            return 0;
        };
        let before = guard.len();
        guard.retain(|_, e| !e.is_expired(now));
        let evicted = before - guard.len();
        if evicted > 0 {
            debug!(evicted, remaining = guard.len(), "local cache sweep");
        }
        evicted
    }

    /// Number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |g| g.len())
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new(super::DEFAULT_TTL)
    }
}

impl ScoreCache for LocalCache {
    fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let found = self
            .entries
            .read()
            .ok()
            .and_then(|g| g.get(key).filter(|e| !e.is_expired(now)).map(|e| e.value.clone()));
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        if let Ok(mut guard) = self.entries.write() {
            guard.insert(key.to_string(), Entry { value, expires_at });
        }
    }

    fn delete(&self, key: &str) {
        if let Ok(mut guard) = self.entries.write() {
            guard.remove(key);
        }
    }

    fn delete_pattern(&self, pattern: &str) -> usize {
        let re = match glob::compile(pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!(pattern, error = %e, "ignoring invalid cache pattern");
                return 0;
            }
        };
        let Ok(mut guard) = self.entries.write() else {
            return 0;
        };
        let before = guard.len();
        guard.retain(|k, _| !re.is_match(k));
        before - guard.len()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            backend_errors: 0,
            degraded: false,
            local_entries: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_after_set_and_delete() {
        let cache = LocalCache::default();
        cache.set("score:a", json!(12.5), None);
        assert_eq!(cache.get("score:a"), Some(json!(12.5)));

        cache.delete("score:a");
        assert_eq!(cache.get("score:a"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn expired_entry_reads_as_miss() {
        let cache = LocalCache::default();
        cache.set("momentum:x", json!({"score": 40}), Some(Duration::ZERO));
        assert_eq!(cache.get("momentum:x"), None);
        // Still physically present until swept.
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn sweep_keeps_live_entries() {
        let cache = LocalCache::default();
        cache.set("a", json!(1), Some(Duration::ZERO));
        cache.set("b", json!(2), Some(Duration::from_secs(60)));
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.get("b"), Some(json!(2)));
    }

    #[test]
    fn delete_pattern_removes_matching_only() {
        let cache = LocalCache::default();
        cache.set("leaderboard:global", json!([]), None);
        cache.set("leaderboard:category:senator", json!([]), None);
        cache.set("score:abc", json!(1), None);

        assert_eq!(cache.delete_pattern("leaderboard:*"), 2);
        assert_eq!(cache.get("leaderboard:global"), None);
        assert_eq!(cache.get("score:abc"), Some(json!(1)));
        assert_eq!(cache.delete_pattern(""), 0);
    }
}
