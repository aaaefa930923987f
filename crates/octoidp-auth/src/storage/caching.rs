//! Caching decorators for client and scope lookups.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ClientStore, ScopeStore};
use crate::AuthResult;
use crate::cache::SingleFlightCache;
use crate::config::CachingOptions;
use crate::types::{Client, Scope};

/// Caches [`ClientStore::find_client_by_id`], including misses.
pub struct CachingClientStore {
    inner: Arc<dyn ClientStore>,
    cache: SingleFlightCache<String, Option<Client>>,
}

impl CachingClientStore {
    #[must_use]
    pub fn new(inner: Arc<dyn ClientStore>, options: &CachingOptions) -> Self {
        Self {
            inner,
            cache: SingleFlightCache::new(options.max_capacity, options.ttl),
        }
    }

    /// Forgets a client, e.g. after its registration changed.
    pub async fn invalidate(&self, client_id: &str) {
        self.cache.invalidate(&client_id.to_string()).await;
    }
}

#[async_trait]
impl ClientStore for CachingClientStore {
    async fn find_client_by_id(&self, client_id: &str) -> AuthResult<Option<Client>> {
        let inner = self.inner.clone();
        let key = client_id.to_string();
        self.cache
            .get_or_compute(key.clone(), || async move {
                tracing::trace!(client_id = %key, "Client cache miss");
                inner.find_client_by_id(&key).await
            })
            .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ScopeQuery {
    Names(Vec<String>),
    All { public_only: bool },
}

/// Caches both [`ScopeStore`] queries.
///
/// Name lookups are keyed by the sorted, de-duplicated name list.
pub struct CachingScopeStore {
    inner: Arc<dyn ScopeStore>,
    cache: SingleFlightCache<ScopeQuery, Vec<Scope>>,
}

impl CachingScopeStore {
    #[must_use]
    pub fn new(inner: Arc<dyn ScopeStore>, options: &CachingOptions) -> Self {
        Self {
            inner,
            cache: SingleFlightCache::new(options.max_capacity, options.ttl),
        }
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl ScopeStore for CachingScopeStore {
    async fn find_scopes_by_names(&self, names: &[String]) -> AuthResult<Vec<Scope>> {
        let mut key = names.to_vec();
        key.sort();
        key.dedup();

        let inner = self.inner.clone();
        let names = key.clone();
        self.cache
            .get_or_compute(ScopeQuery::Names(key), || async move {
                inner.find_scopes_by_names(&names).await
            })
            .await
    }

    async fn get_scopes(&self, public_only: bool) -> AuthResult<Vec<Scope>> {
        let inner = self.inner.clone();
        self.cache
            .get_or_compute(ScopeQuery::All { public_only }, || async move {
                inner.get_scopes(public_only).await
            })
            .await
    }
}
