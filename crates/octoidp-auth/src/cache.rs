//! Generic single-flight cache.
//!
//! [`SingleFlightCache::get_or_compute`] guarantees at most one in-flight
//! computation per key: concurrent callers for the same key await the
//! computation already running instead of starting their own. Failed
//! computations are not cached.

use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use moka::future::Cache;

use crate::AuthResult;

/// Capacity- and TTL-bounded cache with single-flight fills.
#[derive(Clone)]
pub struct SingleFlightCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, V>,
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache holding at most `max_capacity` entries for `ttl` each.
    #[must_use]
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Returns the cached value for `key`, computing it once if absent.
    ///
    /// # Errors
    ///
    /// Returns the error of the computation. Every caller that awaited the
    /// same failed computation receives a clone of that error.
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> AuthResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AuthResult<V>>,
    {
        self.inner
            .try_get_with(key, compute())
            .await
            .map_err(|shared| (*shared).clone())
    }

    /// Returns the cached value without computing.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).await
    }

    /// Drops a single entry.
    pub async fn invalidate(&self, key: &K) {
        self.inner.invalidate(key).await;
    }

    /// Drops every entry.
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

impl<K, V> std::fmt::Debug for SingleFlightCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlightCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}
