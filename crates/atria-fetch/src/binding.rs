//! Per-consumer fetch binding.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use atria_cache::CachedFetcher;
use atria_session::SessionEvent;

use crate::config::FetchConfig;
use crate::error::{FetchError, Result};
use crate::retry::retry_with_backoff;

/// Boxed future produced by a fetch function.
pub type FetchFuture<V> = Pin<Box<dyn Future<Output = Result<V>> + Send>>;

/// The fetch operation a binding drives (ultimately a backend call).
pub type FetchFn<V> = Arc<dyn Fn() -> FetchFuture<V> + Send + Sync>;

/// Box an async closure into a [`FetchFn`].
pub fn boxed_fetch<V, F, Fut>(f: F) -> FetchFn<V>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Observable state of a binding.
#[derive(Debug, Clone)]
pub struct FetchSnapshot<V> {
    /// Most recent successful value, if any.
    pub data: Option<V>,

    /// Whether a fetch cycle is in flight.
    pub loading: bool,

    /// Error from the most recent failed cycle, cleared on success.
    pub error: Option<FetchError>,

    /// When data was last obtained (from cache or backend).
    pub last_fetch: Option<Instant>,
}

struct BindingInner<V> {
    data: Option<V>,
    loading: bool,
    error: Option<FetchError>,
    last_fetch: Option<Instant>,

    /// Monotonic fetch-cycle counter; only the newest cycle may write
    /// state, so a stale late completion is discarded.
    generation: u64,

    /// Cancellation handle of the in-flight cycle.
    current: Option<CancellationToken>,
}

/// Binds one cache key and fetch operation to observable loading, data,
/// and error state.
///
/// Starting a new fetch cycle cancels the previous one; a cancelled
/// cycle never mutates state and is never retried. Transient failures
/// retry with exponential backoff before surfacing an error. Focus,
/// reconnect, and session events drive revalidation.
pub struct FetchBinding<V> {
    fetcher: CachedFetcher<V>,
    key: String,
    fetch_fn: FetchFn<V>,
    config: FetchConfig,
    inner: Mutex<BindingInner<V>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<V> FetchBinding<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Create a binding.
    pub fn new(
        fetcher: CachedFetcher<V>,
        key: impl Into<String>,
        fetch_fn: FetchFn<V>,
        config: FetchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            fetcher,
            key: key.into(),
            fetch_fn,
            config,
            inner: Mutex::new(BindingInner {
                data: None,
                loading: false,
                error: None,
                last_fetch: None,
                generation: 0,
                current: None,
            }),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// The cache key this binding serves.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current observable state.
    pub fn snapshot(&self) -> FetchSnapshot<V> {
        let inner = self.inner.lock();
        FetchSnapshot {
            data: inner.data.clone(),
            loading: inner.loading,
            error: inner.error.clone(),
            last_fetch: inner.last_fetch,
        }
    }

    /// Run a fetch cycle.
    ///
    /// With `force_fresh` false the cache is consulted first; otherwise
    /// the fetch runs unconditionally and repopulates the cache. Any
    /// previous in-flight cycle is cancelled.
    pub async fn fetch(&self, force_fresh: bool) -> Result<V> {
        let (generation, cancel) = {
            let mut inner = self.inner.lock();
            if let Some(prev) = inner.current.take() {
                prev.cancel();
            }
            let cancel = CancellationToken::new();
            inner.current = Some(cancel.clone());
            inner.generation += 1;
            inner.loading = true;
            (inner.generation, cancel)
        };

        trace!(key = %self.key, force_fresh = force_fresh, "Starting fetch cycle");

        let result = if force_fresh {
            self.fetcher
                .fetch_fresh(&self.key, self.config.ttl, || self.run_attempts(&cancel))
                .await
        } else {
            self.fetcher
                .fetch(&self.key, self.config.ttl, || self.run_attempts(&cancel))
                .await
        };

        self.commit(generation, result)
    }

    /// Force a fresh fetch bypassing the cache.
    pub async fn refresh(&self) -> Result<V> {
        self.fetch(true).await
    }

    /// Evict the cache entry, then force a fresh fetch.
    pub async fn invalidate(&self) -> Result<V> {
        self.fetcher.cache().invalidate(&self.key);
        self.fetch(true).await
    }

    /// Revalidate on window focus, but only when the data is older than
    /// the configured threshold.
    pub async fn handle_focus(&self) {
        let action = {
            let inner = self.inner.lock();
            if inner.loading {
                None
            } else {
                match inner.last_fetch {
                    // Never fetched: a plain cache-first fetch.
                    None => Some(false),
                    Some(at) => (at.elapsed() > self.config.focus_revalidate_after).then_some(true),
                }
            }
        };

        if let Some(force) = action {
            trace!(key = %self.key, "Revalidating on focus");
            self.fetch_logged(force).await;
        }
    }

    /// Revalidate after a network reconnect.
    pub async fn handle_reconnect(&self) {
        debug!(key = %self.key, "Revalidating on reconnect");
        self.fetch_logged(true).await;
    }

    /// React to a session event.
    pub async fn handle_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::TokenRefreshed => {
                debug!(key = %self.key, "Revalidating after token refresh");
                self.fetch_logged(true).await;
            }
            SessionEvent::ForcedLogout { reason } => {
                debug!(key = %self.key, reason = %reason, "Session ended, clearing binding");
                let mut inner = self.inner.lock();
                if let Some(current) = inner.current.take() {
                    current.cancel();
                }
                // Orphan any in-flight cycle so it cannot write state.
                inner.generation += 1;
                inner.data = None;
                inner.loading = false;
                inner.error = Some(FetchError::SessionEnded);
            }
            SessionEvent::ValidationError { .. } => {}
        }
    }

    /// Spawn a task feeding session events into this binding.
    pub fn attach_session(self: &Arc<Self>, mut events: broadcast::Receiver<SessionEvent>) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(binding) = weak.upgrade() else { break };
                        binding.handle_session_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Session event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Cancel in-flight work and stop listening for events.
    pub fn detach(&self) {
        let mut inner = self.inner.lock();
        if let Some(current) = inner.current.take() {
            current.cancel();
        }
        inner.generation += 1;
        inner.loading = false;
        drop(inner);

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    async fn fetch_logged(&self, force_fresh: bool) {
        match self.fetch(force_fresh).await {
            Ok(_) | Err(FetchError::Cancelled) => {}
            Err(e) => debug!(key = %self.key, error = %e, "Revalidation failed"),
        }
    }

    /// Run the fetch operation with timeout, cancellation, and retry.
    async fn run_attempts(&self, cancel: &CancellationToken) -> Result<V> {
        let fetch_fn = Arc::clone(&self.fetch_fn);
        let timeout = self.config.timeout;

        retry_with_backoff(
            self.config.retry_attempts,
            self.config.retry_base_delay,
            cancel,
            move || {
                let fut = fetch_fn();
                let cancel = cancel.clone();
                async move {
                    let attempt = async {
                        match timeout {
                            Some(t) => match tokio::time::timeout(t, fut).await {
                                Ok(result) => result,
                                Err(_) => Err(FetchError::Timeout(t)),
                            },
                            None => fut.await,
                        }
                    };
                    tokio::select! {
                        _ = cancel.cancelled() => Err(FetchError::Cancelled),
                        result = attempt => result,
                    }
                }
            },
        )
        .await
    }

    /// Write a cycle's outcome into state, unless a newer cycle owns it.
    fn commit(&self, generation: u64, result: Result<V>) -> Result<V> {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            // Superseded; the newer cycle owns the state now.
            return result;
        }

        inner.current = None;
        inner.loading = false;

        match &result {
            Ok(value) => {
                inner.data = Some(value.clone());
                inner.error = None;
                inner.last_fetch = Some(Instant::now());
            }
            Err(FetchError::Cancelled) => {
                // Intentional discard; keep previous data and error.
            }
            Err(e) => {
                inner.error = Some(e.clone());
            }
        }

        result
    }
}

impl<V> Drop for FetchBinding<V> {
    fn drop(&mut self) {
        if let Some(current) = self.inner.lock().current.take() {
            current.cancel();
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
