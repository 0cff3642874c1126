//! Configuration for fetch bindings.

use std::time::Duration;

/// Default number of retries after the initial attempt.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 2;

/// Default base delay for exponential backoff.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default data age beyond which a focus event triggers revalidation.
pub const DEFAULT_FOCUS_REVALIDATE_AFTER: Duration = Duration::from_secs(30);

/// Configuration for a fetch binding.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Retries after the initial attempt; attempt `n` waits
    /// `retry_base_delay * 2^n` first.
    pub retry_attempts: u32,

    /// Base delay for exponential backoff.
    pub retry_base_delay: Duration,

    /// Per-attempt timeout (`None` disables it).
    pub timeout: Option<Duration>,

    /// A focus event revalidates only when the cached data is older
    /// than this.
    pub focus_revalidate_after: Duration,

    /// TTL for values this binding stores (`None` uses the cache's
    /// default).
    pub ttl: Option<Duration>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            timeout: Some(DEFAULT_TIMEOUT),
            focus_revalidate_after: DEFAULT_FOCUS_REVALIDATE_AFTER,
            ttl: None,
        }
    }
}

impl FetchConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry count.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Set the backoff base delay.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disable the per-attempt timeout.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Set the focus revalidation threshold.
    pub fn with_focus_revalidate_after(mut self, age: Duration) -> Self {
        self.focus_revalidate_after = age;
        self
    }

    /// Set the TTL for stored values.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}
