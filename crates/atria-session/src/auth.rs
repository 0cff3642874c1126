//! Auth provider abstraction.
//!
//! The hosted auth backend is the source of truth for identity; this
//! crate only consumes its public call contract. [`MemoryAuthProvider`]
//! stands in for it in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use atria_cache::unix_ms_now;

use crate::error::{Error, Result};

/// A snapshot of the externally-owned auth session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    /// Identifier of the signed-in user.
    pub user_id: String,

    /// Opaque access token.
    pub access_token: String,

    /// Wall-clock expiry of the session, in unix milliseconds.
    pub expires_at_ms: u64,
}

impl AuthSession {
    /// Create a session expiring `lease` from now.
    pub fn expiring_in(user_id: impl Into<String>, lease: Duration) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: String::new(),
            expires_at_ms: unix_ms_now().saturating_add(lease.as_millis() as u64),
        }
    }

    /// Milliseconds until expiry (zero if already past).
    pub fn expires_in_ms(&self) -> u64 {
        self.expires_at_ms.saturating_sub(unix_ms_now())
    }
}

/// The auth backend's public call contract.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The current session, if any. `Ok(None)` means the backend
    /// definitively reports no session; transport failures must surface
    /// as `Err`.
    async fn get_session(&self) -> Result<Option<AuthSession>>;

    /// Refresh the current session's token, returning the new session.
    async fn refresh_session(&self) -> Result<AuthSession>;

    /// Terminate the current session.
    async fn sign_out(&self) -> Result<()>;
}

/// Shared auth provider handle.
pub type SharedAuthProvider = Arc<dyn AuthProvider>;

/// Default lease granted by [`MemoryAuthProvider`] on refresh.
const DEFAULT_REFRESH_LEASE: Duration = Duration::from_secs(3600);

/// In-memory auth provider for tests.
///
/// Holds a settable session, counts refreshes and sign-outs, and can be
/// told to fail validation or refresh to simulate connectivity loss.
#[derive(Debug)]
pub struct MemoryAuthProvider {
    session: RwLock<Option<AuthSession>>,
    refresh_lease: Duration,
    refresh_count: AtomicU32,
    sign_out_count: AtomicU32,
    fail_validation: AtomicBool,
    fail_refresh: AtomicBool,
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            refresh_lease: DEFAULT_REFRESH_LEASE,
            refresh_count: AtomicU32::new(0),
            sign_out_count: AtomicU32::new(0),
            fail_validation: AtomicBool::new(false),
            fail_refresh: AtomicBool::new(false),
        }
    }

    pub fn with_session(session: AuthSession) -> Self {
        Self {
            session: RwLock::new(Some(session)),
            ..Self::new()
        }
    }

    /// Replace the current session.
    pub async fn set_session(&self, session: Option<AuthSession>) {
        *self.session.write().await = session;
    }

    /// Make `get_session` fail until reset.
    pub fn set_fail_validation(&self, fail: bool) {
        self.fail_validation.store(fail, Ordering::SeqCst);
    }

    /// Make `refresh_session` fail until reset.
    pub fn set_fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    pub fn refresh_count(&self) -> u32 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    pub fn sign_out_count(&self) -> u32 {
        self.sign_out_count.load(Ordering::SeqCst)
    }
}

impl Default for MemoryAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    async fn get_session(&self) -> Result<Option<AuthSession>> {
        if self.fail_validation.load(Ordering::SeqCst) {
            return Err(Error::Provider("network unreachable".into()));
        }
        Ok(self.session.read().await.clone())
    }

    async fn refresh_session(&self) -> Result<AuthSession> {
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(Error::Provider("refresh failed".into()));
        }

        let mut session = self.session.write().await;
        match session.as_mut() {
            Some(s) => {
                s.expires_at_ms = unix_ms_now().saturating_add(self.refresh_lease.as_millis() as u64);
                self.refresh_count.fetch_add(1, Ordering::SeqCst);
                Ok(s.clone())
            }
            None => Err(Error::NoSession),
        }
    }

    async fn sign_out(&self) -> Result<()> {
        *self.session.write().await = None;
        self.sign_out_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_and_set_session() {
        let provider = MemoryAuthProvider::new();
        assert!(provider.get_session().await.unwrap().is_none());

        provider
            .set_session(Some(AuthSession::expiring_in("u1", Duration::from_secs(60))))
            .await;

        let session = provider.get_session().await.unwrap().unwrap();
        assert_eq!(session.user_id, "u1");
        assert!(session.expires_in_ms() > 0);
    }

    #[tokio::test]
    async fn test_refresh_extends_expiry() {
        let provider = MemoryAuthProvider::new();
        provider
            .set_session(Some(AuthSession::expiring_in("u1", Duration::from_millis(100))))
            .await;

        let refreshed = provider.refresh_session().await.unwrap();
        assert!(refreshed.expires_in_ms() > 100);
        assert_eq!(provider.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_without_session_fails() {
        let provider = MemoryAuthProvider::new();
        assert!(matches!(
            provider.refresh_session().await,
            Err(Error::NoSession)
        ));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let provider = MemoryAuthProvider::new();
        provider.set_fail_validation(true);
        assert!(provider.get_session().await.is_err());

        provider.set_fail_validation(false);
        assert!(provider.get_session().await.is_ok());
    }

    #[tokio::test]
    async fn test_sign_out_clears_session() {
        let provider = MemoryAuthProvider::new();
        provider
            .set_session(Some(AuthSession::expiring_in("u1", Duration::from_secs(60))))
            .await;

        provider.sign_out().await.unwrap();
        assert!(provider.get_session().await.unwrap().is_none());
        assert_eq!(provider.sign_out_count(), 1);
    }
}
