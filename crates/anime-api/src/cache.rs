//! In-memory response cache with per-entry expiration.
//!
//! Entries are keyed by the fully-qualified request URL. Expiration is checked
//! lazily on read; there is no background sweep.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Default time-to-live for cached responses
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// A cached JSON document and the instant it stops being valid
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Response cache shared by every call through a client
#[derive(Debug)]
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    /// Whether caching is enabled
    enabled: bool,
    default_ttl: Duration,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(true, DEFAULT_TTL)
    }
}

impl ResponseCache {
    /// Create a new response cache
    pub fn new(enabled: bool, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            enabled,
            default_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a cached value if it exists and has not expired.
    ///
    /// A stale entry is evicted as a side effect.
    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }

        let now = Instant::now();
        let mut inner = self.lock();

        match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let value = entry.value.clone();
                inner.hits += 1;
                debug!(key = key, "Cache hit");
                Some(value)
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.misses += 1;
                debug!(key = key, "Cache entry expired, evicted");
                None
            }
            None => {
                inner.misses += 1;
                debug!(key = key, "Cache miss");
                None
            }
        }
    }

    /// Store a value with the default TTL
    pub fn set(&self, key: &str, value: Value) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Store a value, replacing any existing entry for the key
    pub fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) {
        if !self.enabled {
            return;
        }

        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.lock().entries.insert(key.to_string(), entry);
        debug!(key = key, ttl_secs = ttl.as_secs(), "Cache stored");
    }

    /// Remove one entry, if present
    pub fn remove(&self, key: &str) {
        if self.lock().entries.remove(key).is_some() {
            debug!(key = key, "Cache entry removed");
        }
    }

    /// Remove every entry
    pub fn clear(&self) {
        let mut inner = self.lock();
        let removed = inner.entries.len();
        inner.entries.clear();
        info!(removed = removed, "Cache cleared");
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get cache statistics
    ///
    /// `entries` counts stored entries, including stale ones not yet read.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}
