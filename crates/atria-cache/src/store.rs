//! In-memory TTL store with LRU eviction.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::expiry::{Deadline, ExpiryMap};

/// Inner state protected by RwLock.
struct StoreInner<V> {
    /// LRU map of entries; recency order doubles as the eviction order.
    lru: LruCache<String, V>,

    /// Fixed expiry deadline per key.
    expiry: ExpiryMap,

    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// In-memory cache with per-entry TTL and LRU eviction.
///
/// Entries die at a fixed deadline set when they are written; reads
/// update recency (for eviction) but never extend a deadline. Expired
/// entries are removed lazily when a read finds them, and in bulk by
/// [`Store::sweep_expired`]. All operations are synchronous and cannot
/// fail; there is no I/O in the store itself.
pub struct Store<V> {
    inner: RwLock<StoreInner<V>>,
    config: CacheConfig,
}

impl<V: Clone> Store<V> {
    /// Create a new store.
    pub fn new(config: CacheConfig) -> Self {
        let cap = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);

        let inner = StoreInner {
            lru: LruCache::new(cap),
            expiry: ExpiryMap::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        };

        Self {
            inner: RwLock::new(inner),
            config,
        }
    }

    /// Get the store configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Insert or replace an entry.
    ///
    /// The entry expires `ttl` from now (the configured default when
    /// `None`). If the store is at capacity the least-recently-accessed
    /// entry is evicted first. Returns the entry's deadline.
    pub fn set(&self, key: &str, value: V, ttl: Option<std::time::Duration>) -> Deadline {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let deadline = Deadline::after(ttl);
        self.set_with_deadline(key, value, deadline);
        deadline
    }

    /// Insert or replace an entry with an already-computed deadline.
    ///
    /// Used when applying an entry received from another instance, so the
    /// remaining TTL carries over instead of restarting.
    pub fn set_with_deadline(&self, key: &str, value: V, deadline: Deadline) {
        let mut inner = self.inner.write();

        if inner.lru.len() >= self.config.capacity && !inner.lru.contains(key) {
            let victim = inner.lru.peek_lru().map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                debug!(key = %victim, "Evicting LRU entry to make room");
                inner.lru.pop(&victim);
                inner.expiry.remove(&victim);
                inner.evictions += 1;
            }
        }

        inner.lru.put(key.to_string(), value);
        inner.expiry.insert_deadline(key, deadline);

        trace!(key = %key, size = inner.lru.len(), "Entry stored");
    }

    /// Get an entry's value if present and unexpired.
    ///
    /// Updates the entry's recency. An expired entry found here is
    /// removed (lazy expiry).
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.write();

        if inner.expiry.is_expired(key) {
            if inner.lru.pop(key).is_some() {
                debug!(key = %key, "Entry expired, removing");
                inner.expirations += 1;
            }
            inner.expiry.remove(key);
            inner.misses += 1;
            return None;
        }

        let value = inner.lru.get(key).cloned();
        match value {
            Some(value) => {
                inner.hits += 1;
                trace!(key = %key, "Cache hit");
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Check presence honoring expiry, without updating recency.
    pub fn has(&self, key: &str) -> bool {
        let inner = self.inner.read();
        inner.lru.contains(key) && !inner.expiry.is_expired(key)
    }

    /// Peek at a value without updating recency.
    pub fn peek(&self, key: &str) -> Option<V> {
        let inner = self.inner.read();
        if inner.expiry.is_expired(key) {
            None
        } else {
            inner.lru.peek(key).cloned()
        }
    }

    /// The wall-clock deadline of a live entry, in unix milliseconds.
    pub fn deadline_ms(&self, key: &str) -> Option<u64> {
        let inner = self.inner.read();
        if inner.expiry.is_expired(key) {
            None
        } else {
            inner.expiry.deadline_ms(key)
        }
    }

    /// Remove an entry. Idempotent; absent keys are a no-op.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.inner.write();
        inner.expiry.remove(key);
        let removed = inner.lru.pop(key).is_some();
        if removed {
            debug!(key = %key, "Entry invalidated");
        }
        removed
    }

    /// Remove every entry whose key matches the pattern.
    ///
    /// Returns the removed keys.
    pub fn invalidate_pattern(&self, pattern: &Regex) -> Vec<String> {
        let mut inner = self.inner.write();

        let matched: Vec<String> = inner
            .lru
            .iter()
            .filter(|(key, _)| pattern.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &matched {
            inner.lru.pop(key);
            inner.expiry.remove(key);
        }

        if !matched.is_empty() {
            debug!(pattern = %pattern, count = matched.len(), "Entries invalidated by pattern");
        }

        matched
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.lru.clear();
        inner.expiry.clear();
        debug!("Cache cleared");
    }

    /// Remove all expired entries, returning how many were removed.
    ///
    /// The bulk complement to lazy expiry on read; callers can drive this
    /// on whatever interval suits them.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.write();
        let expired = inner.expiry.drain_expired();
        let mut count = 0;

        for key in expired {
            if inner.lru.pop(&key).is_some() {
                count += 1;
            }
        }

        if count > 0 {
            inner.expirations += count as u64;
            debug!(count = count, "Swept expired entries");
        }

        count
    }

    /// Current number of entries (live or not yet swept).
    pub fn len(&self) -> usize {
        self.inner.read().lru.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.read().lru.is_empty()
    }

    /// List all unexpired keys.
    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .lru
            .iter()
            .filter(|(key, _)| !inner.expiry.is_expired(key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        CacheStats {
            size: inner.lru.len(),
            capacity: self.config.capacity,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Current number of entries.
    pub size: usize,

    /// Maximum capacity.
    pub capacity: usize,

    /// Reads that found a live entry.
    pub hits: u64,

    /// Reads that found nothing (or an expired entry).
    pub misses: u64,

    /// Entries evicted to make room.
    pub evictions: u64,

    /// Entries removed because their deadline passed.
    pub expirations: u64,
}
