//! Memoization of expensive or rate-limited calls on top of [`TieredCache`]
//!
//! The wrapper owns no expiry state of its own: every lookup and store goes
//! through the shared cache, so TTLs, eviction and tag clears apply to memo
//! entries exactly as they do to any other key.

use crate::cache::coordinator::TieredCache;
use crate::cache::entry::SetOptions;
use crate::cache::types::CacheKey;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Derive a stable key from a function identity and its arguments
///
/// Arguments are canonicalized through `serde_json::Value` first, so map
/// arguments hash the same regardless of iteration order.
pub fn memo_key<A: Serialize + ?Sized>(function: &str, args: &A) -> Result<CacheKey> {
    let canonical = serde_json::to_value(args)?;
    let bytes = serde_json::to_vec(&canonical)?;

    let mut hasher = Sha256::new();
    hasher.update(function.as_bytes());
    hasher.update([0u8]);
    hasher.update(&bytes);
    Ok(format!("memo:{}:{:x}", function, hasher.finalize()))
}

/// A memoized function from `A` to `R`
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tiered_cache::{CacheConfig, Memoized, TieredCache};
///
/// # async fn example() -> anyhow::Result<()> {
/// let cache = Arc::new(TieredCache::new(CacheConfig::default()).await?);
/// let forecast: Memoized<String, f64> =
///     Memoized::new(cache, "weather::forecast", Duration::from_secs(600));
///
/// let _temp = forecast
///     .get_or_compute("paris".to_string(), |city| async move {
///         // call the upstream API here
///         Ok::<_, anyhow::Error>(if city == "paris" { 18.5 } else { 0.0 })
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Memoized<A, R> {
    cache: Arc<TieredCache>,
    function: &'static str,
    options: SetOptions,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R> Memoized<A, R>
where
    A: Serialize,
    R: Serialize + DeserializeOwned,
{
    pub fn new(cache: Arc<TieredCache>, function: &'static str, ttl: Duration) -> Self {
        Self {
            cache,
            function,
            options: SetOptions::new().ttl(ttl),
            _marker: PhantomData,
        }
    }

    /// Tag every memoized result, e.g. with the upstream source name
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = self.options.tags(tags);
        self
    }

    /// Cache key used for `args`
    pub fn key_for(&self, args: &A) -> Result<CacheKey> {
        memo_key(self.function, args)
    }

    /// Return the cached result for `args`, or run `compute` and cache it
    ///
    /// Errors from `compute` are returned as-is and nothing is cached. Cache
    /// failures never fail the call: the result is computed and returned.
    pub async fn get_or_compute<F, Fut>(&self, args: A, compute: F) -> anyhow::Result<R>
    where
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = anyhow::Result<R>>,
    {
        let key = match self.key_for(&args) {
            Ok(key) => key,
            Err(e) => {
                warn!(function = self.function, error = %e, "arguments not hashable, bypassing cache");
                return compute(args).await;
            }
        };

        if let Some(cached) = self.cache.get_as::<R>(&key).await {
            debug!(function = self.function, key = %key, "memoized result hit");
            return Ok(cached);
        }

        let result = compute(args).await?;
        if let Err(e) = self
            .cache
            .set_serialized(key.clone(), &result, self.options.clone())
            .await
        {
            warn!(function = self.function, key = %key, error = %e, "failed to cache memoized result");
        }
        Ok(result)
    }

    /// Drop the cached result for `args`
    pub async fn invalidate(&self, args: &A) -> bool {
        match self.key_for(args) {
            Ok(key) => self.cache.delete(&key).await,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_memo_key_is_stable() {
        let a = memo_key("flights::search", &("CDG", "JFK", 2)).unwrap();
        let b = memo_key("flights::search", &("CDG", "JFK", 2)).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("memo:flights::search:"));

        let other_args = memo_key("flights::search", &("CDG", "LHR", 2)).unwrap();
        assert_ne!(a, other_args);

        let other_function = memo_key("hotels::search", &("CDG", "JFK", 2)).unwrap();
        assert_ne!(a, other_function);
    }

    #[test]
    fn test_memo_key_ignores_map_order() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for (k, v) in [("city", "paris"), ("units", "metric"), ("lang", "fr")] {
            first.insert(k, v);
        }
        for (k, v) in [("lang", "fr"), ("units", "metric"), ("city", "paris")] {
            second.insert(k, v);
        }

        assert_eq!(
            memo_key("weather", &first).unwrap(),
            memo_key("weather", &second).unwrap()
        );
    }
}
