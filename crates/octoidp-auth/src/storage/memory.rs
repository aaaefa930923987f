//! In-memory store implementations.
//!
//! Suitable for tests, development and single-node deployments. Nothing
//! survives a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{ClientStore, ConsentStore, HandleItem, HandleStore, ScopeStore};
use crate::AuthResult;
use crate::clock::SharedClock;
use crate::types::{Client, Consent, Scope};

// =============================================================================
// Clients and Scopes
// =============================================================================

/// Fixed set of clients.
#[derive(Debug, Clone, Default)]
pub struct InMemoryClientStore {
    clients: HashMap<String, Client>,
}

impl InMemoryClientStore {
    #[must_use]
    pub fn new(clients: impl IntoIterator<Item = Client>) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|client| (client.client_id.clone(), client))
                .collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl ClientStore for InMemoryClientStore {
    async fn find_client_by_id(&self, client_id: &str) -> AuthResult<Option<Client>> {
        Ok(self.clients.get(client_id).cloned())
    }
}

/// Fixed set of scopes, kept in registration order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryScopeStore {
    scopes: Vec<Scope>,
}

impl InMemoryScopeStore {
    #[must_use]
    pub fn new(scopes: impl IntoIterator<Item = Scope>) -> Self {
        Self {
            scopes: scopes.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ScopeStore for InMemoryScopeStore {
    async fn find_scopes_by_names(&self, names: &[String]) -> AuthResult<Vec<Scope>> {
        Ok(self
            .scopes
            .iter()
            .filter(|scope| names.contains(&scope.name))
            .cloned()
            .collect())
    }

    async fn get_scopes(&self, public_only: bool) -> AuthResult<Vec<Scope>> {
        Ok(self
            .scopes
            .iter()
            .filter(|scope| !public_only || scope.show_in_discovery_document)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Handles
// =============================================================================

/// Handle store on a [`DashMap`].
///
/// `take` maps to [`DashMap::remove`], which holds the shard lock for the
/// duration of the removal, so at most one caller receives the item.
pub struct InMemoryHandleStore<T: HandleItem> {
    items: DashMap<String, T>,
    clock: SharedClock,
}

impl<T: HandleItem> InMemoryHandleStore<T> {
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            items: DashMap::new(),
            clock,
        }
    }

    /// Number of stored items, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Deletes every expired item. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.items.len();
        self.items.retain(|_, item| item.expires_at() > now);
        before.saturating_sub(self.items.len())
    }

    fn is_live(&self, item: &T) -> bool {
        item.expires_at() > self.clock.now()
    }
}

impl<T: HandleItem> std::fmt::Debug for InMemoryHandleStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryHandleStore")
            .field("items", &self.items.len())
            .finish()
    }
}

#[async_trait]
impl<T: HandleItem> HandleStore<T> for InMemoryHandleStore<T> {
    async fn store(&self, handle: &str, item: T) -> AuthResult<()> {
        self.items.insert(handle.to_string(), item);
        Ok(())
    }

    async fn replace(&self, handle: &str, item: T) -> AuthResult<bool> {
        let now = self.clock.now();
        match self.items.get_mut(handle) {
            Some(mut entry) if entry.value().expires_at() > now => {
                *entry.value_mut() = item;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, handle: &str) -> AuthResult<Option<T>> {
        // Clone out before touching the map again; a live Ref would deadlock remove_if.
        let Some(item) = self.items.get(handle).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };
        if self.is_live(&item) {
            return Ok(Some(item));
        }
        let now = self.clock.now();
        self.items.remove_if(handle, |_, stored| stored.expires_at() <= now);
        Ok(None)
    }

    async fn take(&self, handle: &str) -> AuthResult<Option<T>> {
        Ok(self
            .items
            .remove(handle)
            .map(|(_, item)| item)
            .filter(|item| self.is_live(item)))
    }

    async fn remove(&self, handle: &str) -> AuthResult<bool> {
        Ok(self.items.remove(handle).is_some())
    }

    async fn get_all(&self, subject_id: &str) -> AuthResult<Vec<T>> {
        Ok(self
            .items
            .iter()
            .filter(|entry| entry.value().subject_id() == Some(subject_id))
            .filter(|entry| self.is_live(entry.value()))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn revoke(&self, subject_id: &str, client_id: &str) -> AuthResult<usize> {
        let mut removed = 0;
        self.items.retain(|_, item| {
            let matches = item.subject_id() == Some(subject_id) && item.client_id() == client_id;
            if matches {
                removed += 1;
            }
            !matches
        });
        Ok(removed)
    }
}

// =============================================================================
// Consent
// =============================================================================

/// Consent decisions keyed by `(subject, client)`.
#[derive(Debug, Default)]
pub struct InMemoryConsentStore {
    consents: DashMap<(String, String), Consent>,
}

impl InMemoryConsentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsentStore for InMemoryConsentStore {
    async fn load(&self, subject_id: &str, client_id: &str) -> AuthResult<Option<Consent>> {
        Ok(self
            .consents
            .get(&(subject_id.to_string(), client_id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn update(&self, consent: Consent) -> AuthResult<()> {
        let key = (consent.subject.clone(), consent.client_id.clone());
        if consent.scopes.is_empty() {
            self.consents.remove(&key);
        } else {
            self.consents.insert(key, consent);
        }
        Ok(())
    }

    async fn revoke(&self, subject_id: &str, client_id: &str) -> AuthResult<()> {
        self.consents
            .remove(&(subject_id.to_string(), client_id.to_string()));
        Ok(())
    }
}
