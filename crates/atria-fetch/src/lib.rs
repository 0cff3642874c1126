//! Per-consumer data-fetch bindings for Atria.
//!
//! A [`FetchBinding`] ties one cache key and one fetch operation to
//! observable loading, data, and error state. It
//! serves repeat reads from the shared cache, retries transient
//! failures with exponential backoff, cancels superseded fetches so a
//! stale response never overwrites a newer one, and revalidates on
//! focus, reconnect, and session events.
//!
//! ```rust,ignore
//! let binding = FetchBinding::new(
//!     fetcher,
//!     cache_key("profile", &[user_id]),
//!     boxed_fetch(move || load_profile(user_id)),
//!     FetchConfig::new().with_ttl(Duration::from_secs(120)),
//! );
//! binding.attach_session(monitor.subscribe());
//! let profile = binding.fetch(false).await?;
//! ```

mod binding;
mod config;
mod error;
mod retry;

pub use binding::{FetchBinding, FetchFn, FetchFuture, FetchSnapshot, boxed_fetch};
pub use config::{
    DEFAULT_FOCUS_REVALIDATE_AFTER, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY,
    DEFAULT_TIMEOUT, FetchConfig,
};
pub use error::{FetchError, Result};
pub use retry::retry_with_backoff;
