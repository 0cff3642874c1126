//! User activity tracking for inactivity-based expiry.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{trace, warn};

use atria_cache::{
    InstanceId, PersistedEntry, SnapshotStore, SyncMessage, SyncPayload, SyncTransport, unix_ms_now,
};

/// Snapshot-store key for the shared last-activity marker.
pub const ACTIVITY_KEY: &str = "atria:session:last_activity";

/// How long a persisted activity marker stays relevant.
const ACTIVITY_RECORD_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Tracked user interaction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Pointer,
    Key,
    Scroll,
    Touch,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityKind::Pointer => write!(f, "pointer"),
            ActivityKind::Key => write!(f, "key"),
            ActivityKind::Scroll => write!(f, "scroll"),
            ActivityKind::Touch => write!(f, "touch"),
        }
    }
}

struct ActivityInner {
    last_activity_ms: u64,
    active: bool,
}

/// Tracks the most recent user interaction and the instance's
/// active/visible state.
///
/// Activity is kept in wall-clock milliseconds so marks from different
/// instances are comparable; local interactions are published so an idle
/// instance doesn't log the user out while they work elsewhere.
pub struct ActivityTracker {
    origin: InstanceId,
    transport: Arc<dyn SyncTransport>,
    snapshot: Arc<dyn SnapshotStore>,
    inner: RwLock<ActivityInner>,
}

impl ActivityTracker {
    /// Create a tracker. Construction counts as activity.
    pub fn new(
        origin: InstanceId,
        snapshot: Arc<dyn SnapshotStore>,
        transport: Arc<dyn SyncTransport>,
    ) -> Self {
        Self {
            origin,
            transport,
            snapshot,
            inner: RwLock::new(ActivityInner {
                last_activity_ms: unix_ms_now(),
                active: true,
            }),
        }
    }

    /// Record a local user interaction, persist the marker, and announce
    /// it to other instances.
    pub fn record(&self, kind: ActivityKind) {
        let now = unix_ms_now();
        self.inner.write().last_activity_ms = now;
        trace!(kind = %kind, "Activity recorded");

        let entry = PersistedEntry::new(
            serde_json::json!(now),
            now.saturating_add(ACTIVITY_RECORD_TTL_MS),
        );
        if let Err(e) = self.snapshot.put(ACTIVITY_KEY, &entry) {
            warn!(error = %e, "Failed to persist activity marker");
        }

        self.transport.publish(SyncMessage {
            origin: self.origin,
            payload: SyncPayload::Activity { at_ms: now },
        });
    }

    /// Fold in an activity mark observed from another instance.
    pub fn observe_remote(&self, at_ms: u64) {
        let mut inner = self.inner.write();
        if at_ms > inner.last_activity_ms {
            inner.last_activity_ms = at_ms;
        }
    }

    /// Time since the most recent known interaction, local or remote.
    pub fn idle_for(&self) -> Duration {
        let last = self.inner.read().last_activity_ms;
        Duration::from_millis(unix_ms_now().saturating_sub(last))
    }

    /// Wall-clock milliseconds of the most recent known interaction.
    pub fn last_activity_ms(&self) -> u64 {
        self.inner.read().last_activity_ms
    }

    /// Record whether this instance is active (visible/focused).
    pub fn set_active(&self, active: bool) {
        self.inner.write().active = active;
    }

    /// Whether this instance is active.
    pub fn is_active(&self) -> bool {
        self.inner.read().active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atria_cache::{LocalTransport, MemorySnapshotStore};

    fn tracker() -> (ActivityTracker, Arc<MemorySnapshotStore>) {
        let snapshot = Arc::new(MemorySnapshotStore::new());
        let tracker = ActivityTracker::new(
            InstanceId::new_v4(),
            Arc::clone(&snapshot) as Arc<dyn SnapshotStore>,
            Arc::new(LocalTransport::new()),
        );
        (tracker, snapshot)
    }

    #[tokio::test]
    async fn test_record_updates_mark_and_persists() {
        let (tracker, snapshot) = tracker();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(tracker.idle_for() >= Duration::from_millis(20));

        tracker.record(ActivityKind::Pointer);
        assert!(tracker.idle_for() < Duration::from_millis(20));
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_remote_marks_only_move_forward() {
        let (tracker, _) = tracker();
        let now = tracker.last_activity_ms();

        tracker.observe_remote(now.saturating_sub(10_000));
        assert_eq!(tracker.last_activity_ms(), now);

        tracker.observe_remote(now + 10_000);
        assert_eq!(tracker.last_activity_ms(), now + 10_000);
    }

    #[tokio::test]
    async fn test_active_flag() {
        let (tracker, _) = tracker();
        assert!(tracker.is_active());
        tracker.set_active(false);
        assert!(!tracker.is_active());
    }
}
