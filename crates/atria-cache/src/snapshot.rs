//! Persisted snapshot records for warm starts across instances.
//!
//! The snapshot store is the analog of origin-scoped browser storage: a
//! shared key/value map that new instances scan on startup to seed their
//! in-memory cache. Records are synchronization hints, never a source of
//! truth; last write wins per key and no locking is attempted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A persisted cache record: the serialized value and its absolute
/// wall-clock deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub value: serde_json::Value,
    pub expires_at_ms: u64,
}

impl PersistedEntry {
    pub fn new(value: serde_json::Value, expires_at_ms: u64) -> Self {
        Self {
            value,
            expires_at_ms,
        }
    }
}

/// Shared persisted key/value store.
///
/// Implementations must tolerate concurrent writers (last write wins) and
/// may fail; callers treat failures as a degradation to instance-local
/// caching, not an error to propagate.
pub trait SnapshotStore: Send + Sync {
    /// Insert or replace a record.
    fn put(&self, key: &str, entry: &PersistedEntry) -> Result<()>;

    /// Remove a record. Absent keys are a no-op.
    fn remove(&self, key: &str) -> Result<()>;

    /// Remove every record.
    fn clear(&self) -> Result<()>;

    /// All records currently in the store.
    fn scan(&self) -> Result<Vec<(String, PersistedEntry)>>;
}

/// In-memory snapshot store for tests and single-instance use.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<HashMap<String, PersistedEntry>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn put(&self, key: &str, entry: &PersistedEntry) -> Result<()> {
        self.entries.lock().insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(String, PersistedEntry)>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// File-backed snapshot store: one JSON document holding the whole map.
///
/// Suited to a handful of cooperating local processes; every operation
/// reads, updates, and rewrites the file under an in-process lock.
pub struct FileSnapshotStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSnapshotStore {
    /// Create a store backed by the given file. The file is created on
    /// first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, PersistedEntry>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Snapshot(format!("Failed to read {}: {}", self.path.display(), e)))?;

        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        Ok(serde_json::from_str(&content)?)
    }

    fn persist(&self, entries: &HashMap<String, PersistedEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Snapshot(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json)
            .map_err(|e| Error::Snapshot(format!("Failed to write {}: {}", self.path.display(), e)))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn put(&self, key: &str, entry: &PersistedEntry) -> Result<()> {
        let _guard = self.lock.lock();
        let mut entries = self.load()?;
        entries.insert(key.to_string(), entry.clone());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock();
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| {
                Error::Snapshot(format!("Failed to remove {}: {}", self.path.display(), e))
            })?;
        }
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(String, PersistedEntry)>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: serde_json::Value) -> PersistedEntry {
        PersistedEntry::new(value, 9_999_999_999_999)
    }

    #[test]
    fn test_memory_put_scan_remove() {
        let store = MemorySnapshotStore::new();
        store.put("a", &entry(json!(1))).unwrap();
        store.put("b", &entry(json!(2))).unwrap();

        assert_eq!(store.scan().unwrap().len(), 2);

        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.len(), 1);

        store.clear().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("snapshots.json"));

        store.put("profile:1", &entry(json!({"name": "Ana"}))).unwrap();
        store.put("profile:2", &entry(json!({"name": "Bo"}))).unwrap();

        let mut scanned = store.scan().unwrap();
        scanned.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].0, "profile:1");
        assert_eq!(scanned[0].1.value, json!({"name": "Ana"}));

        store.remove("profile:1").unwrap();
        assert_eq!(store.scan().unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.json");

        FileSnapshotStore::new(&path)
            .put("k", &entry(json!("v")))
            .unwrap();

        let reopened = FileSnapshotStore::new(&path);
        let scanned = reopened.scan().unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].1.value, json!("v"));
    }

    #[test]
    fn test_missing_file_scans_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("never-written.json"));
        assert!(store.scan().unwrap().is_empty());
        store.clear().unwrap();
    }
}
