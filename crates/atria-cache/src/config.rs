//! Configuration for the cache.

use std::time::Duration;

/// Default maximum number of entries before LRU eviction.
pub const DEFAULT_CAPACITY: usize = 500;

/// Default TTL applied when a caller does not supply one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default prefix under which entries are mirrored to the snapshot store.
pub const DEFAULT_SYNC_PREFIX: &str = "atria:cache";

/// Configuration for the cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries to hold before LRU eviction.
    pub capacity: usize,

    /// TTL applied to entries inserted without an explicit TTL.
    pub default_ttl: Duration,

    /// Prefix scoping this cache's snapshot records and sync messages.
    /// Several caches can share one snapshot store and transport as long
    /// as their prefixes differ.
    pub sync_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            default_ttl: DEFAULT_TTL,
            sync_prefix: DEFAULT_SYNC_PREFIX.to_string(),
        }
    }
}

impl CacheConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of entries.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the TTL applied when callers don't supply one.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the snapshot-store prefix.
    pub fn with_sync_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sync_prefix = prefix.into();
        self
    }
}
