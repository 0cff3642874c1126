//! Absolute-deadline tracking for entry expiration.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Current wall-clock time in milliseconds since the unix epoch.
///
/// Used for deadlines that must survive crossing instance boundaries,
/// where a monotonic [`Instant`] has no meaning.
pub fn unix_ms_now() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// A fixed expiry deadline, kept in both clock domains.
///
/// The monotonic instant drives all in-process checks; the wall-clock
/// milliseconds are what gets mirrored to other instances.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    /// Monotonic deadline for in-process expiry checks.
    pub at: Instant,

    /// Wall-clock deadline in unix milliseconds, for mirroring.
    pub at_ms: u64,
}

impl Deadline {
    /// Compute a deadline `ttl` from now.
    pub fn after(ttl: Duration) -> Self {
        Self {
            at: Instant::now() + ttl,
            at_ms: unix_ms_now().saturating_add(ttl.as_millis() as u64),
        }
    }

    /// Rebuild a deadline from a wall-clock deadline received from
    /// another instance, keeping the remaining TTL.
    ///
    /// Returns `None` when the deadline has already passed.
    pub fn from_wall_ms(at_ms: u64) -> Option<Self> {
        let remaining = at_ms.checked_sub(unix_ms_now())?;
        if remaining == 0 {
            return None;
        }
        Some(Self {
            at: Instant::now() + Duration::from_millis(remaining),
            at_ms,
        })
    }

    /// Whether the deadline has passed.
    pub fn is_past(&self) -> bool {
        Instant::now() > self.at
    }
}

/// Tracks the expiry deadline for each cached key.
///
/// Entries expire at a fixed point set at write time; reads never extend
/// a deadline.
#[derive(Debug, Default)]
pub struct ExpiryMap {
    deadlines: HashMap<String, Deadline>,
}

impl ExpiryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a deadline `ttl` from now for a key, returning it.
    pub fn insert(&mut self, key: &str, ttl: Duration) -> Deadline {
        let deadline = Deadline::after(ttl);
        self.deadlines.insert(key.to_string(), deadline);
        deadline
    }

    /// Record an already-computed deadline (e.g. one received from
    /// another instance).
    pub fn insert_deadline(&mut self, key: &str, deadline: Deadline) {
        self.deadlines.insert(key.to_string(), deadline);
    }

    /// Check whether a key's deadline has passed.
    ///
    /// An untracked key is treated as expired.
    pub fn is_expired(&self, key: &str) -> bool {
        match self.deadlines.get(key) {
            None => true,
            Some(deadline) => deadline.is_past(),
        }
    }

    /// The wall-clock deadline for a key, if tracked.
    pub fn deadline_ms(&self, key: &str) -> Option<u64> {
        self.deadlines.get(key).map(|d| d.at_ms)
    }

    /// Stop tracking a key.
    pub fn remove(&mut self, key: &str) {
        self.deadlines.remove(key);
    }

    /// Remove all expired entries and return their keys.
    pub fn drain_expired(&mut self) -> Vec<String> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| now > deadline.at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.deadlines.remove(key);
        }
        expired
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Drop all tracking data.
    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_untracked_key_is_expired() {
        let map = ExpiryMap::new();
        assert!(map.is_expired("missing"));
    }

    #[test]
    fn test_deadline_is_fixed_at_write() {
        let mut map = ExpiryMap::new();
        map.insert("k", Duration::from_millis(40));

        thread::sleep(Duration::from_millis(25));
        // Reading expiry state must not extend the deadline.
        assert!(!map.is_expired("k"));

        thread::sleep(Duration::from_millis(25));
        assert!(map.is_expired("k"));
    }

    #[test]
    fn test_drain_expired() {
        let mut map = ExpiryMap::new();
        map.insert("a", Duration::from_millis(10));
        map.insert("b", Duration::from_millis(10));
        map.insert("c", Duration::from_secs(60));

        thread::sleep(Duration::from_millis(20));

        let mut expired = map.drain_expired();
        expired.sort();
        assert_eq!(expired, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_wall_clock_deadline_tracks_ttl() {
        let mut map = ExpiryMap::new();
        let before = unix_ms_now();
        let deadline = map.insert("k", Duration::from_secs(10));

        assert!(deadline.at_ms >= before + 10_000);
        assert_eq!(map.deadline_ms("k"), Some(deadline.at_ms));
    }
}
