//! Pub/sub transport for cross-instance cache and session signals.
//!
//! Each cache or monitor instance owns its in-memory state; the transport
//! only carries hints (writes, tombstones, logout and activity signals)
//! so other instances can converge. Delivery is best-effort and may be
//! observed out of order relative to same-instance operations; entries
//! are idempotent snapshots with absolute deadlines, so that is safe.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

/// Identifies one cache/monitor instance (the analog of a browser tab).
pub type InstanceId = uuid::Uuid;

/// Default buffer size for the local broadcast channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Payload of a sync message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncPayload {
    /// A cache entry was written. Carries the serialized value and its
    /// absolute wall-clock deadline so receivers apply the remaining TTL.
    /// `scope` is the writing cache's sync prefix; caches under a
    /// different prefix ignore the message.
    Set {
        scope: String,
        key: String,
        value: serde_json::Value,
        expires_at_ms: u64,
    },

    /// A cache entry was removed.
    Remove { scope: String, key: String },

    /// The whole cache was cleared.
    Clear { scope: String },

    /// A forced logout happened somewhere; receivers clear local state
    /// without re-validating.
    Logout { reason: String },

    /// User activity was observed, for cross-instance inactivity
    /// tracking.
    Activity { at_ms: u64 },
}

/// A sync message with its originating instance.
///
/// Receivers ignore messages carrying their own id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub origin: InstanceId,
    pub payload: SyncPayload,
}

/// Receiving end of a transport subscription.
pub struct SyncReceiver {
    rx: broadcast::Receiver<SyncMessage>,
}

impl SyncReceiver {
    /// Receive the next message, or `None` once the transport is gone.
    ///
    /// A receiver that fell behind skips ahead to the oldest retained
    /// message; cache hints are disposable, so lost messages only mean a
    /// colder cache.
    pub async fn recv(&mut self) -> Option<SyncMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Sync receiver lagged, skipping ahead");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Transport carrying sync messages between instances.
///
/// Publishing must never block or fail the caller; a transport with no
/// listeners silently drops messages.
pub trait SyncTransport: Send + Sync {
    /// Publish a message to all subscribers.
    fn publish(&self, msg: SyncMessage);

    /// Subscribe to messages published after this call.
    fn subscribe(&self) -> SyncReceiver;
}

/// In-process transport over a tokio broadcast channel.
///
/// Connects instances within one process; a cross-process transport can
/// implement [`SyncTransport`] over whatever bus is available.
pub struct LocalTransport {
    tx: broadcast::Sender<SyncMessage>,
}

impl LocalTransport {
    /// Create a transport with the default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a transport buffering up to `capacity` undelivered messages
    /// per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for LocalTransport {
    fn publish(&self, msg: SyncMessage) {
        // Send only errors when there are no subscribers, which is fine.
        let _ = self.tx.send(msg);
    }

    fn subscribe(&self) -> SyncReceiver {
        SyncReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let transport = LocalTransport::new();
        let mut rx = transport.subscribe();

        let origin = InstanceId::new_v4();
        transport.publish(SyncMessage {
            origin,
            payload: SyncPayload::Remove {
                scope: "atria:cache".into(),
                key: "k".into(),
            },
        });

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.origin, origin);
        assert!(matches!(msg.payload, SyncPayload::Remove { ref key, .. } if key == "k"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_a_noop() {
        let transport = LocalTransport::new();
        transport.publish(SyncMessage {
            origin: InstanceId::new_v4(),
            payload: SyncPayload::Clear {
                scope: "atria:cache".into(),
            },
        });
        assert_eq!(transport.subscriber_count(), 0);
    }

    #[test]
    fn test_payload_serialization_is_tagged() {
        let payload = SyncPayload::Set {
            scope: "atria:cache".into(),
            key: "profile:1".into(),
            value: serde_json::json!({"name": "Ana"}),
            expires_at_ms: 1000,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"type\":\"set\""));

        let back: SyncPayload = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, SyncPayload::Set { .. }));
    }
}
