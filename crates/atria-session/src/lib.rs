//! Session validity monitoring for Atria.
//!
//! This crate watches the externally-owned auth session and decides when
//! the application must log out:
//! - Periodic validation against the auth provider, with a clock-skew
//!   buffer and proactive token refresh near expiry
//! - Inactivity tracking shared across instances
//! - Forced logout broadcast so every instance clears its state at once
//!
//! Transient failures (network loss, provider hiccups) are reported but
//! never log the user out; only a definitively absent or expired session
//! does.
//!
//! # Example
//!
//! ```rust,ignore
//! use atria_session::{MonitorConfig, SessionMonitor};
//!
//! let monitor = SessionMonitor::new(provider, snapshot, transport, MonitorConfig::new());
//! monitor.start();
//!
//! let mut events = monitor.subscribe();
//! while let Ok(event) = events.recv().await {
//!     // react to TokenRefreshed / ForcedLogout
//! }
//! ```

mod activity;
mod auth;
mod config;
mod error;
mod events;
mod monitor;

pub use activity::{ACTIVITY_KEY, ActivityKind, ActivityTracker};
pub use auth::{AuthProvider, AuthSession, MemoryAuthProvider, SharedAuthProvider};
pub use config::MonitorConfig;
pub use error::{Error, Result};
pub use events::{LogoutReason, SessionEvent};
pub use monitor::{MonitorState, SessionMonitor};
