//! Periodic session validation and forced-logout handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use atria_cache::{
    InstanceId, SnapshotStore, SyncMessage, SyncPayload, SyncTransport, unix_ms_now,
};

use crate::activity::{ActivityKind, ActivityTracker};
use crate::auth::SharedAuthProvider;
use crate::config::MonitorConfig;
use crate::events::{LogoutReason, SessionEvent};

/// Buffer size for the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle state of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// No successful validation yet; a "no session" answer here is a
    /// startup race, not an expiry.
    Uninitialized,

    /// A validation call is in flight.
    Validating,

    /// The session checked out on the last validation.
    Valid,

    /// The session ended; a forced logout was performed or observed.
    Expired,

    /// The last validation failed transiently. Never escalates to
    /// logout by itself.
    Error,
}

/// Watches session freshness and user activity, forcing logout when the
/// session is definitively gone, expired, or idle too long.
///
/// Exactly one forced logout happens per monitor; it is broadcast so
/// other instances clear their state without re-validating. Transient
/// validation failures are reported but never log the user out.
pub struct SessionMonitor {
    id: InstanceId,
    provider: SharedAuthProvider,
    transport: Arc<dyn SyncTransport>,
    snapshot: Arc<dyn SnapshotStore>,
    activity: ActivityTracker,
    config: MonitorConfig,
    state: RwLock<MonitorState>,
    initialized: AtomicBool,
    logged_out: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionMonitor {
    /// Create a monitor. Call [`SessionMonitor::start`] to begin the
    /// periodic checks and remote-signal handling.
    pub fn new(
        provider: SharedAuthProvider,
        snapshot: Arc<dyn SnapshotStore>,
        transport: Arc<dyn SyncTransport>,
        config: MonitorConfig,
    ) -> Arc<Self> {
        let id = InstanceId::new_v4();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Arc::new(Self {
            id,
            provider,
            transport: Arc::clone(&transport),
            snapshot: Arc::clone(&snapshot),
            activity: ActivityTracker::new(id, snapshot, transport),
            config,
            state: RwLock::new(MonitorState::Uninitialized),
            initialized: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
            events,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the periodic check loop and the remote-signal listener.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();

        let weak = Arc::downgrade(self);
        let check_interval = self.config.check_interval;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);
            loop {
                interval.tick().await;
                let Some(monitor) = weak.upgrade() else { break };
                if monitor.is_logged_out() {
                    break;
                }
                // Background instances rely on the active one's checks.
                if !monitor.activity.is_active() {
                    continue;
                }
                monitor.check_session().await;
                monitor.check_inactivity().await;
            }
        }));

        let weak = Arc::downgrade(self);
        let mut rx = self.transport.subscribe();
        tasks.push(tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let Some(monitor) = weak.upgrade() else { break };
                monitor.handle_signal(msg);
            }
        }));
    }

    /// This instance's id.
    pub fn instance_id(&self) -> InstanceId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MonitorState {
        *self.state.read()
    }

    /// Whether a validation has ever succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Whether a forced logout happened or was observed.
    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    /// Route the embedder should navigate to after a forced logout.
    pub fn logout_redirect(&self) -> &str {
        &self.config.landing_route
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Record a local user interaction.
    pub fn record_activity(&self, kind: ActivityKind) {
        self.activity.record(kind);
    }

    /// Record whether this instance is active (visible/focused).
    pub fn set_active(&self, active: bool) {
        self.activity.set_active(active);
    }

    /// The activity tracker.
    pub fn activity(&self) -> &ActivityTracker {
        &self.activity
    }

    /// Validate the session against the provider.
    ///
    /// Provider errors are transient: they are reported and the state
    /// moves to [`MonitorState::Error`], but the user is never logged
    /// out for them.
    pub async fn check_session(&self) {
        if self.is_logged_out() {
            return;
        }
        *self.state.write() = MonitorState::Validating;

        match self.provider.get_session().await {
            Err(e) => {
                warn!(error = %e, "Session validation failed, treating as transient");
                *self.state.write() = MonitorState::Error;
                self.emit(SessionEvent::ValidationError {
                    message: e.to_string(),
                });
            }
            Ok(None) => {
                if self.is_initialized() {
                    self.force_logout(LogoutReason::SessionMissing).await;
                } else {
                    // Startup race: the session may simply not have
                    // loaded yet.
                    debug!("No session before initialization, waiting");
                    *self.state.write() = MonitorState::Uninitialized;
                }
            }
            Ok(Some(session)) => {
                self.initialized.store(true, Ordering::SeqCst);

                let now = unix_ms_now();
                let deadline = session
                    .expires_at_ms
                    .saturating_sub(self.config.expiry_buffer.as_millis() as u64);

                if now >= deadline {
                    self.force_logout(LogoutReason::SessionExpired).await;
                    return;
                }

                if deadline - now <= self.config.refresh_window.as_millis() as u64 {
                    match self.provider.refresh_session().await {
                        Ok(refreshed) => {
                            debug!(
                                user_id = %refreshed.user_id,
                                expires_in_ms = refreshed.expires_in_ms(),
                                "Token refreshed proactively"
                            );
                            self.emit(SessionEvent::TokenRefreshed);
                        }
                        Err(e) => {
                            // Transient; the next check will try again.
                            warn!(error = %e, "Proactive refresh failed");
                        }
                    }
                }

                if !self.is_logged_out() {
                    *self.state.write() = MonitorState::Valid;
                }
            }
        }
    }

    /// Force logout if the user has been idle past the threshold.
    ///
    /// Only applies once initialized and while this instance is active.
    pub async fn check_inactivity(&self) {
        if !self.is_initialized() || self.is_logged_out() || !self.activity.is_active() {
            return;
        }

        let idle = self.activity.idle_for();
        if idle > self.config.inactivity_threshold {
            info!(idle_ms = idle.as_millis() as u64, "Inactivity threshold exceeded");
            self.force_logout(LogoutReason::Inactivity).await;
        }
    }

    /// End the session everywhere. Happens at most once per monitor.
    async fn force_logout(&self, reason: LogoutReason) {
        if self.logged_out.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(reason = %reason, "Forcing logout");
        *self.state.write() = MonitorState::Expired;

        self.transport.publish(SyncMessage {
            origin: self.id,
            payload: SyncPayload::Logout {
                reason: reason.to_string(),
            },
        });

        if let Err(e) = self.snapshot.clear() {
            warn!(error = %e, "Failed to clear snapshot store on logout");
        }

        if let Err(e) = self.provider.sign_out().await {
            // The session is treated as ended regardless.
            warn!(error = %e, "Provider sign-out failed");
        }

        self.emit(SessionEvent::ForcedLogout { reason });
    }

    /// React to a signal from another instance.
    fn handle_signal(&self, msg: SyncMessage) {
        if msg.origin == self.id {
            return;
        }

        match msg.payload {
            SyncPayload::Logout { reason } => {
                if self.logged_out.swap(true, Ordering::SeqCst) {
                    return;
                }
                info!(reason = %reason, "Logout observed from another instance");
                *self.state.write() = MonitorState::Expired;
                self.emit(SessionEvent::ForcedLogout {
                    reason: LogoutReason::from_signal(&reason),
                });
            }
            SyncPayload::Activity { at_ms } => {
                self.activity.observe_remote(at_ms);
            }
            _ => {}
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Send only errors when nobody is subscribed.
        let _ = self.events.send(event);
    }

    /// Stop the background tasks.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthSession, MemoryAuthProvider};
    use atria_cache::{LocalTransport, MemorySnapshotStore};
    use std::time::Duration;

    struct Fixture {
        provider: Arc<MemoryAuthProvider>,
        monitor: Arc<SessionMonitor>,
        transport: Arc<LocalTransport>,
    }

    fn fixture(config: MonitorConfig) -> Fixture {
        let provider = Arc::new(MemoryAuthProvider::new());
        let transport = Arc::new(LocalTransport::new());
        let monitor = SessionMonitor::new(
            Arc::clone(&provider) as SharedAuthProvider,
            Arc::new(MemorySnapshotStore::new()),
            Arc::clone(&transport) as Arc<dyn SyncTransport>,
            config,
        );
        Fixture {
            provider,
            monitor,
            transport,
        }
    }

    fn strict_config() -> MonitorConfig {
        MonitorConfig::new()
            .with_expiry_buffer(Duration::ZERO)
            .with_refresh_window(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_no_session_before_init_does_not_logout() {
        let f = fixture(strict_config());

        f.monitor.check_session().await;

        assert_eq!(f.monitor.state(), MonitorState::Uninitialized);
        assert!(!f.monitor.is_logged_out());
        assert_eq!(f.provider.sign_out_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_session_after_init_logs_out_once() {
        let f = fixture(strict_config());
        let mut events = f.monitor.subscribe();

        f.provider
            .set_session(Some(AuthSession::expiring_in("u1", Duration::from_secs(3600))))
            .await;
        f.monitor.check_session().await;
        assert_eq!(f.monitor.state(), MonitorState::Valid);
        assert!(f.monitor.is_initialized());

        f.provider.set_session(None).await;
        f.monitor.check_session().await;
        f.monitor.check_session().await;

        assert_eq!(f.monitor.state(), MonitorState::Expired);
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::ForcedLogout {
                reason: LogoutReason::SessionMissing
            }
        ));
        assert!(events.try_recv().is_err());
        assert_eq!(f.provider.sign_out_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_logs_out() {
        let f = fixture(strict_config());

        f.provider
            .set_session(Some(AuthSession::expiring_in("u1", Duration::from_secs(3600))))
            .await;
        f.monitor.check_session().await;

        f.provider
            .set_session(Some(AuthSession::expiring_in("u1", Duration::ZERO)))
            .await;
        f.monitor.check_session().await;

        assert_eq!(f.monitor.state(), MonitorState::Expired);
        assert!(f.monitor.is_logged_out());
    }

    #[tokio::test]
    async fn test_near_expiry_triggers_proactive_refresh() {
        let config = MonitorConfig::new()
            .with_expiry_buffer(Duration::ZERO)
            .with_refresh_window(Duration::from_secs(600));
        let f = fixture(config);
        let mut events = f.monitor.subscribe();

        f.provider
            .set_session(Some(AuthSession::expiring_in("u1", Duration::from_secs(60))))
            .await;
        f.monitor.check_session().await;

        assert_eq!(f.monitor.state(), MonitorState::Valid);
        assert_eq!(f.provider.refresh_count(), 1);
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::TokenRefreshed
        ));
    }

    #[tokio::test]
    async fn test_validation_error_never_logs_out() {
        let f = fixture(strict_config());
        let mut events = f.monitor.subscribe();

        f.provider
            .set_session(Some(AuthSession::expiring_in("u1", Duration::from_secs(3600))))
            .await;
        f.monitor.check_session().await;

        f.provider.set_fail_validation(true);
        f.monitor.check_session().await;

        assert_eq!(f.monitor.state(), MonitorState::Error);
        assert!(!f.monitor.is_logged_out());
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::ValidationError { .. }
        ));

        // Connectivity returns; the monitor recovers.
        f.provider.set_fail_validation(false);
        f.monitor.check_session().await;
        assert_eq!(f.monitor.state(), MonitorState::Valid);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_transient() {
        let config = MonitorConfig::new()
            .with_expiry_buffer(Duration::ZERO)
            .with_refresh_window(Duration::from_secs(600));
        let f = fixture(config);

        f.provider
            .set_session(Some(AuthSession::expiring_in("u1", Duration::from_secs(60))))
            .await;
        f.provider.set_fail_refresh(true);
        f.monitor.check_session().await;

        assert_eq!(f.monitor.state(), MonitorState::Valid);
        assert!(!f.monitor.is_logged_out());
    }

    #[tokio::test]
    async fn test_inactivity_logs_out_exactly_once() {
        let config = strict_config().with_inactivity_threshold(Duration::from_millis(50));
        let f = fixture(config);

        f.provider
            .set_session(Some(AuthSession::expiring_in("u1", Duration::from_secs(3600))))
            .await;
        f.monitor.check_session().await;

        // Not yet idle long enough.
        f.monitor.check_inactivity().await;
        assert!(!f.monitor.is_logged_out());

        tokio::time::sleep(Duration::from_millis(80)).await;
        f.monitor.check_inactivity().await;
        f.monitor.check_inactivity().await;

        assert!(f.monitor.is_logged_out());
        assert_eq!(f.provider.sign_out_count(), 1);
    }

    #[tokio::test]
    async fn test_activity_defers_inactivity_logout() {
        let config = strict_config().with_inactivity_threshold(Duration::from_millis(80));
        let f = fixture(config);

        f.provider
            .set_session(Some(AuthSession::expiring_in("u1", Duration::from_secs(3600))))
            .await;
        f.monitor.check_session().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        f.monitor.record_activity(ActivityKind::Key);
        tokio::time::sleep(Duration::from_millis(50)).await;

        f.monitor.check_inactivity().await;
        assert!(!f.monitor.is_logged_out());
    }

    #[tokio::test]
    async fn test_inactive_instance_skips_inactivity_check() {
        let config = strict_config().with_inactivity_threshold(Duration::from_millis(30));
        let f = fixture(config);

        f.provider
            .set_session(Some(AuthSession::expiring_in("u1", Duration::from_secs(3600))))
            .await;
        f.monitor.check_session().await;
        f.monitor.set_active(false);

        tokio::time::sleep(Duration::from_millis(60)).await;
        f.monitor.check_inactivity().await;

        assert!(!f.monitor.is_logged_out());
    }

    #[tokio::test]
    async fn test_remote_logout_clears_without_revalidating() {
        let f = fixture(strict_config());
        f.monitor.start();
        let mut events = f.monitor.subscribe();

        f.transport.publish(SyncMessage {
            origin: InstanceId::new_v4(),
            payload: SyncPayload::Logout {
                reason: "inactivity".into(),
            },
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(f.monitor.is_logged_out());
        assert_eq!(f.monitor.state(), MonitorState::Expired);
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::ForcedLogout {
                reason: LogoutReason::Inactivity
            }
        ));
        // The observing instance does not sign out again.
        assert_eq!(f.provider.sign_out_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_activity_updates_tracker() {
        let f = fixture(strict_config());
        f.monitor.start();

        let future_ms = unix_ms_now() + 30_000;
        f.transport.publish(SyncMessage {
            origin: InstanceId::new_v4(),
            payload: SyncPayload::Activity { at_ms: future_ms },
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(f.monitor.activity().last_activity_ms(), future_ms);
    }

    #[tokio::test]
    async fn test_periodic_loop_drives_validation() {
        let config = strict_config().with_check_interval(Duration::from_millis(20));
        let f = fixture(config);

        f.provider
            .set_session(Some(AuthSession::expiring_in("u1", Duration::from_secs(3600))))
            .await;
        f.monitor.start();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(f.monitor.is_initialized());
        assert_eq!(f.monitor.state(), MonitorState::Valid);
    }
}
