//! TTL/LRU cache with cross-instance synchronization.
//!
//! This crate provides the caching layer for Atria:
//! - An in-memory store with per-entry TTL and LRU eviction
//! - Mirroring of writes and invalidations to other instances over a
//!   pub/sub transport, with a persisted snapshot store for warm starts
//! - A cached fetcher wrapping arbitrary async fetch operations with
//!   check-cache-else-fetch-and-populate semantics
//!
//! # Example
//!
//! ```rust,ignore
//! use atria_cache::{CacheConfig, CachedFetcher, LocalTransport, MemorySnapshotStore, SyncedCache};
//!
//! let cache = SyncedCache::new(
//!     CacheConfig::new().with_capacity(200),
//!     Arc::new(MemorySnapshotStore::new()),
//!     Arc::new(LocalTransport::new()),
//! );
//! let fetcher = CachedFetcher::new(cache);
//!
//! let profile = fetcher
//!     .fetch("profile:42", None, || api.load_profile("42"))
//!     .await?;
//! ```

mod config;
mod error;
mod expiry;
mod fetcher;
mod snapshot;
mod store;
mod sync;
mod synced;

pub use config::{CacheConfig, DEFAULT_CAPACITY, DEFAULT_SYNC_PREFIX, DEFAULT_TTL};
pub use error::{Error, Result};
pub use expiry::{Deadline, ExpiryMap, unix_ms_now};
pub use fetcher::{CachedFetcher, cache_key};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, PersistedEntry, SnapshotStore};
pub use store::{CacheStats, Store};
pub use sync::{
    InstanceId, LocalTransport, SyncMessage, SyncPayload, SyncReceiver, SyncTransport,
};
pub use synced::SyncedCache;
