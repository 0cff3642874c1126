//! Cache wrapper that mirrors writes across instances.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::expiry::Deadline;
use crate::snapshot::{PersistedEntry, SnapshotStore};
use crate::store::{CacheStats, Store};
use crate::sync::{InstanceId, SyncMessage, SyncPayload, SyncTransport};

/// A [`Store`] that keeps other instances in sync.
///
/// Writes are mirrored to a shared [`SnapshotStore`] (so new instances
/// start warm) and announced over a [`SyncTransport`] (so live instances
/// converge). The in-memory store stays authoritative for this instance;
/// mirrored state is only a hint. Snapshot-store failures degrade to
/// instance-local caching and never fail the calling operation.
///
/// Must be constructed inside a tokio runtime; a background task applies
/// messages from other instances until the cache is dropped or
/// [`SyncedCache::shutdown`] is called.
pub struct SyncedCache<V> {
    id: InstanceId,
    store: Store<V>,
    snapshot: Arc<dyn SnapshotStore>,
    transport: Arc<dyn SyncTransport>,
    prefix: String,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<V> SyncedCache<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Create a synced cache, seed it from the snapshot store, and start
    /// applying messages from other instances.
    pub fn new(
        config: CacheConfig,
        snapshot: Arc<dyn SnapshotStore>,
        transport: Arc<dyn SyncTransport>,
    ) -> Arc<Self> {
        let prefix = config.sync_prefix.clone();
        let cache = Arc::new(Self {
            id: InstanceId::new_v4(),
            store: Store::new(config),
            snapshot,
            transport: Arc::clone(&transport),
            prefix,
            task: Mutex::new(None),
        });

        cache.seed();

        let weak = Arc::downgrade(&cache);
        let mut rx = transport.subscribe();
        let handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let Some(cache) = weak.upgrade() else { break };
                cache.apply(msg);
            }
        });
        *cache.task.lock() = Some(handle);

        cache
    }

    /// This instance's id.
    pub fn instance_id(&self) -> InstanceId {
        self.id
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    /// Scan the snapshot store, discard expired records, and seed the
    /// in-memory store with the rest.
    fn seed(&self) {
        let records = match self.snapshot.scan() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Snapshot scan failed, starting cold");
                return;
            }
        };

        let marker = format!("{}:", self.prefix);
        let mut seeded = 0usize;
        for (stored_key, entry) in records {
            let Some(key) = stored_key.strip_prefix(&marker) else {
                continue;
            };

            let Some(deadline) = Deadline::from_wall_ms(entry.expires_at_ms) else {
                // Expired while persisted; drop the record too.
                if let Err(e) = self.snapshot.remove(&stored_key) {
                    warn!(key = %stored_key, error = %e, "Failed to drop expired snapshot record");
                }
                continue;
            };

            match serde_json::from_value::<V>(entry.value) {
                Ok(value) => {
                    self.store.set_with_deadline(key, value, deadline);
                    seeded += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to decode snapshot record, skipping");
                }
            }
        }

        if seeded > 0 {
            debug!(count = seeded, "Seeded cache from snapshot store");
        }
    }

    /// Insert or replace an entry, mirroring it to other instances.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let deadline = self.store.set(key, value.clone(), ttl);

        let json = match serde_json::to_value(&value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key, error = %e, "Value not serializable, caching locally only");
                return;
            }
        };

        let entry = PersistedEntry::new(json.clone(), deadline.at_ms);
        if let Err(e) = self.snapshot.put(&self.prefixed(key), &entry) {
            warn!(key = %key, error = %e, "Snapshot mirror failed, caching locally only");
        }

        self.transport.publish(SyncMessage {
            origin: self.id,
            payload: SyncPayload::Set {
                scope: self.prefix.clone(),
                key: key.to_string(),
                value: json,
                expires_at_ms: deadline.at_ms,
            },
        });
    }

    /// Get an entry's value if present and unexpired.
    pub fn get(&self, key: &str) -> Option<V> {
        self.store.get(key)
    }

    /// Check presence honoring expiry.
    pub fn has(&self, key: &str) -> bool {
        self.store.has(key)
    }

    /// Peek at a value without updating recency.
    pub fn peek(&self, key: &str) -> Option<V> {
        self.store.peek(key)
    }

    /// Remove an entry everywhere. Idempotent.
    pub fn invalidate(&self, key: &str) {
        self.store.invalidate(key);

        if let Err(e) = self.snapshot.remove(&self.prefixed(key)) {
            warn!(key = %key, error = %e, "Failed to remove snapshot record");
        }

        self.transport.publish(SyncMessage {
            origin: self.id,
            payload: SyncPayload::Remove {
                scope: self.prefix.clone(),
                key: key.to_string(),
            },
        });
    }

    /// Remove every entry whose key matches the pattern, everywhere.
    ///
    /// Returns how many local entries were removed.
    pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let removed = self.store.invalidate_pattern(pattern);

        for key in &removed {
            if let Err(e) = self.snapshot.remove(&self.prefixed(key)) {
                warn!(key = %key, error = %e, "Failed to remove snapshot record");
            }
            self.transport.publish(SyncMessage {
                origin: self.id,
                payload: SyncPayload::Remove {
                    scope: self.prefix.clone(),
                    key: key.clone(),
                },
            });
        }

        removed.len()
    }

    /// Remove all entries everywhere.
    pub fn clear(&self) {
        self.store.clear();
        self.clear_snapshot_records();
        self.transport.publish(SyncMessage {
            origin: self.id,
            payload: SyncPayload::Clear {
                scope: self.prefix.clone(),
            },
        });
    }

    /// Remove all local entries without touching other instances.
    pub fn clear_local(&self) {
        self.store.clear();
    }

    /// Remove this cache's records from the snapshot store (other
    /// prefixes sharing the store are left alone).
    fn clear_snapshot_records(&self) {
        let marker = format!("{}:", self.prefix);
        match self.snapshot.scan() {
            Ok(records) => {
                for (stored_key, _) in records {
                    if stored_key.starts_with(&marker) {
                        if let Err(e) = self.snapshot.remove(&stored_key) {
                            warn!(key = %stored_key, error = %e, "Failed to remove snapshot record");
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "Snapshot scan failed during clear"),
        }
    }

    /// Remove all expired entries locally.
    pub fn sweep_expired(&self) -> usize {
        self.store.sweep_expired()
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Apply a message from another instance.
    ///
    /// Cache messages scoped to a different prefix are ignored; logout
    /// signals clear every cache regardless of prefix.
    fn apply(&self, msg: SyncMessage) {
        if msg.origin == self.id {
            return;
        }

        match msg.payload {
            SyncPayload::Set {
                scope,
                key,
                value,
                expires_at_ms,
            } => {
                if scope != self.prefix {
                    return;
                }
                let Some(deadline) = Deadline::from_wall_ms(expires_at_ms) else {
                    trace!(key = %key, "Remote entry already expired, ignoring");
                    return;
                };
                match serde_json::from_value::<V>(value) {
                    Ok(value) => {
                        trace!(key = %key, "Applying remote write");
                        self.store.set_with_deadline(&key, value, deadline);
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to decode remote write, ignoring");
                    }
                }
            }
            SyncPayload::Remove { scope, key } => {
                if scope != self.prefix {
                    return;
                }
                trace!(key = %key, "Applying remote invalidation");
                self.store.invalidate(&key);
            }
            SyncPayload::Clear { scope } => {
                if scope != self.prefix {
                    return;
                }
                debug!("Applying remote clear");
                self.store.clear();
            }
            SyncPayload::Logout { .. } => {
                debug!("Logout observed, clearing cache");
                self.store.clear();
            }
            SyncPayload::Activity { .. } => {}
        }
    }

    /// Stop applying remote messages.
    pub fn shutdown(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl<V> Drop for SyncedCache<V> {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemorySnapshotStore;
    use crate::sync::LocalTransport;
    use serde_json::json;

    fn pair() -> (Arc<dyn SnapshotStore>, Arc<dyn SyncTransport>) {
        (
            Arc::new(MemorySnapshotStore::new()),
            Arc::new(LocalTransport::new()),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_write_propagates_between_instances() {
        let (snapshot, transport) = pair();
        let a: Arc<SyncedCache<String>> =
            SyncedCache::new(CacheConfig::new(), Arc::clone(&snapshot), Arc::clone(&transport));
        let b: Arc<SyncedCache<String>> = SyncedCache::new(CacheConfig::new(), snapshot, transport);

        a.set("user_42", "Ana".to_string(), Some(Duration::from_secs(5)));
        settle().await;

        assert_eq!(b.get("user_42"), Some("Ana".to_string()));
    }

    #[tokio::test]
    async fn test_invalidation_propagates() {
        let (snapshot, transport) = pair();
        let a: Arc<SyncedCache<String>> =
            SyncedCache::new(CacheConfig::new(), Arc::clone(&snapshot), Arc::clone(&transport));
        let b: Arc<SyncedCache<String>> = SyncedCache::new(CacheConfig::new(), snapshot, transport);

        a.set("k", "v".to_string(), None);
        settle().await;
        assert!(b.has("k"));

        a.invalidate("k");
        settle().await;
        assert!(!b.has("k"));
    }

    #[tokio::test]
    async fn test_remote_entry_keeps_remaining_ttl() {
        let (snapshot, transport) = pair();
        let a: Arc<SyncedCache<String>> =
            SyncedCache::new(CacheConfig::new(), Arc::clone(&snapshot), Arc::clone(&transport));
        let b: Arc<SyncedCache<String>> = SyncedCache::new(CacheConfig::new(), snapshot, transport);

        a.set("k", "v".to_string(), Some(Duration::from_millis(150)));
        settle().await;
        assert!(b.has("k"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!b.has("k"));
    }

    #[tokio::test]
    async fn test_caches_with_different_prefixes_stay_isolated() {
        let (snapshot, transport) = pair();
        let a: Arc<SyncedCache<String>> = SyncedCache::new(
            CacheConfig::new().with_sync_prefix("app:a"),
            Arc::clone(&snapshot),
            Arc::clone(&transport),
        );
        let b: Arc<SyncedCache<String>> = SyncedCache::new(
            CacheConfig::new().with_sync_prefix("app:b"),
            snapshot,
            transport,
        );

        a.set("k", "from-a".to_string(), None);
        b.set("k", "from-b".to_string(), None);
        settle().await;

        // A write under one prefix never crosses into the other.
        assert_eq!(a.get("k"), Some("from-a".to_string()));
        assert_eq!(b.get("k"), Some("from-b".to_string()));

        a.invalidate("k");
        a.clear();
        settle().await;

        assert!(!a.has("k"));
        assert_eq!(b.get("k"), Some("from-b".to_string()));
    }

    #[tokio::test]
    async fn test_new_instance_seeds_from_snapshot() {
        let (snapshot, transport) = pair();
        let a: Arc<SyncedCache<String>> =
            SyncedCache::new(CacheConfig::new(), Arc::clone(&snapshot), Arc::clone(&transport));
        a.set("warm", "start".to_string(), Some(Duration::from_secs(5)));

        // A later instance starts warm even though it missed the message.
        let late: Arc<SyncedCache<String>> = SyncedCache::new(CacheConfig::new(), snapshot, transport);
        assert_eq!(late.get("warm"), Some("start".to_string()));
    }

    #[tokio::test]
    async fn test_seeding_discards_expired_records() {
        let snapshot = Arc::new(MemorySnapshotStore::new());
        snapshot
            .put(
                "atria:cache:stale",
                &PersistedEntry::new(json!("old"), 1),
            )
            .unwrap();
        snapshot
            .put(
                "atria:cache:live",
                &PersistedEntry::new(
                    json!("fresh"),
                    crate::expiry::unix_ms_now() + 60_000,
                ),
            )
            .unwrap();

        let cache: Arc<SyncedCache<String>> = SyncedCache::new(
            CacheConfig::new(),
            Arc::clone(&snapshot) as Arc<dyn SnapshotStore>,
            Arc::new(LocalTransport::new()),
        );

        assert_eq!(cache.get("live"), Some("fresh".to_string()));
        assert!(!cache.has("stale"));
        // The stale record is gone from the store as well.
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_logout_signal_clears_cache() {
        let (snapshot, transport) = pair();
        let cache: Arc<SyncedCache<String>> =
            SyncedCache::new(CacheConfig::new(), snapshot, Arc::clone(&transport));

        cache.set("k", "v".to_string(), None);

        transport.publish(SyncMessage {
            origin: InstanceId::new_v4(),
            payload: SyncPayload::Logout {
                reason: "inactivity".into(),
            },
        });
        settle().await;

        assert!(cache.is_empty());
    }

    struct FailingSnapshotStore;

    impl SnapshotStore for FailingSnapshotStore {
        fn put(&self, _: &str, _: &PersistedEntry) -> crate::error::Result<()> {
            Err(crate::error::Error::Snapshot("quota exceeded".into()))
        }
        fn remove(&self, _: &str) -> crate::error::Result<()> {
            Err(crate::error::Error::Snapshot("quota exceeded".into()))
        }
        fn clear(&self) -> crate::error::Result<()> {
            Err(crate::error::Error::Snapshot("quota exceeded".into()))
        }
        fn scan(&self) -> crate::error::Result<Vec<(String, PersistedEntry)>> {
            Err(crate::error::Error::Snapshot("storage disabled".into()))
        }
    }

    #[tokio::test]
    async fn test_snapshot_failure_degrades_to_local_caching() {
        let cache: Arc<SyncedCache<String>> = SyncedCache::new(
            CacheConfig::new(),
            Arc::new(FailingSnapshotStore),
            Arc::new(LocalTransport::new()),
        );

        cache.set("k", "v".to_string(), None);
        assert_eq!(cache.get("k"), Some("v".to_string()));

        cache.invalidate("k");
        assert!(!cache.has("k"));
    }
}
