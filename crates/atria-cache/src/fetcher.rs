//! Check-cache-else-fetch-and-populate wrapper.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use crate::synced::SyncedCache;

/// Build a cache key from an endpoint name and its parameters.
///
/// `cache_key("profile", &["42"])` yields `"profile:42"`, which the
/// endpoint- and user-scoped invalidation helpers know how to match.
pub fn cache_key(endpoint: &str, params: &[&str]) -> String {
    let mut key = String::from(endpoint);
    for param in params {
        key.push(':');
        key.push_str(param);
    }
    key
}

/// Wraps fetch operations with cache-first semantics.
///
/// A miss runs the supplied fetch and stores the result; a rejected
/// fetch propagates its error and caches nothing. Concurrent misses for
/// the same key are not deduplicated: each one runs its own fetch.
pub struct CachedFetcher<V> {
    cache: Arc<SyncedCache<V>>,
}

impl<V> Clone for CachedFetcher<V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<V> CachedFetcher<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Create a fetcher over a synced cache.
    pub fn new(cache: Arc<SyncedCache<V>>) -> Self {
        Self { cache }
    }

    /// The underlying cache.
    pub fn cache(&self) -> &Arc<SyncedCache<V>> {
        &self.cache
    }

    /// Return the cached value for `key` if fresh; otherwise run
    /// `fetch_fn`, store its result with `ttl`, and return it.
    pub async fn fetch<F, Fut, E>(&self, key: &str, ttl: Option<Duration>, fetch_fn: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.cache.get(key) {
            trace!(key = %key, "Serving from cache");
            return Ok(value);
        }

        self.fetch_fresh(key, ttl, fetch_fn).await
    }

    /// Run `fetch_fn` unconditionally and store its result with `ttl`.
    pub async fn fetch_fresh<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch_fn: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        debug!(key = %key, "Cache miss, fetching");
        let value = fetch_fn().await?;
        self.cache.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Remove every cached entry for an endpoint (keys starting with
    /// `endpoint`). Returns how many entries were removed locally.
    pub fn invalidate_endpoint(&self, endpoint: &str) -> usize {
        let pattern = format!("^{}(:|$)", regex::escape(endpoint));
        self.invalidate_matching(&pattern)
    }

    /// Remove every cached entry scoped to a user (keys containing
    /// `user_id` as a `:`-delimited segment). Returns how many entries
    /// were removed locally.
    pub fn invalidate_user(&self, user_id: &str) -> usize {
        let pattern = format!("(^|:){}(:|$)", regex::escape(user_id));
        self.invalidate_matching(&pattern)
    }

    fn invalidate_matching(&self, pattern: &str) -> usize {
        match Regex::new(pattern) {
            Ok(re) => self.cache.invalidate_pattern(&re),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Invalid invalidation pattern");
                0
            }
        }
    }
}
