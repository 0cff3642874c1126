//! Configuration for the session monitor.

use std::time::Duration;

/// Default interval between periodic session checks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Default inactivity threshold before forced logout.
pub const DEFAULT_INACTIVITY_THRESHOLD: Duration = Duration::from_secs(30 * 60);

/// Default clock-skew safety buffer subtracted from the session expiry.
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default horizon within which an expiring token is proactively
/// refreshed.
pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Default landing route reported with a forced logout.
pub const DEFAULT_LANDING_ROUTE: &str = "/login";

/// Configuration for the session monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between periodic session checks (only while active).
    pub check_interval: Duration,

    /// Inactivity duration after which logout is forced.
    pub inactivity_threshold: Duration,

    /// Safety buffer subtracted from the session expiry before
    /// comparing against now, to absorb clock skew.
    pub expiry_buffer: Duration,

    /// When the session expires within this window, the token is
    /// refreshed proactively instead of waiting for expiry.
    pub refresh_window: Duration,

    /// Route the embedder should navigate to after a forced logout.
    pub landing_route: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            inactivity_threshold: DEFAULT_INACTIVITY_THRESHOLD,
            expiry_buffer: DEFAULT_EXPIRY_BUFFER,
            refresh_window: DEFAULT_REFRESH_WINDOW,
            landing_route: DEFAULT_LANDING_ROUTE.to_string(),
        }
    }
}

impl MonitorConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the periodic check interval.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set the inactivity threshold.
    pub fn with_inactivity_threshold(mut self, threshold: Duration) -> Self {
        self.inactivity_threshold = threshold;
        self
    }

    /// Set the expiry safety buffer.
    pub fn with_expiry_buffer(mut self, buffer: Duration) -> Self {
        self.expiry_buffer = buffer;
        self
    }

    /// Set the proactive refresh window.
    pub fn with_refresh_window(mut self, window: Duration) -> Self {
        self.refresh_window = window;
        self
    }

    /// Set the post-logout landing route.
    pub fn with_landing_route(mut self, route: impl Into<String>) -> Self {
        self.landing_route = route.into();
        self
    }
}
