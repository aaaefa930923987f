//! Storage traits consumed by the protocol engine.
//!
//! The engine never talks to a database directly. Clients and scopes are
//! resolved through [`ClientStore`] and [`ScopeStore`], short-lived artifacts
//! (authorization codes, reference tokens, refresh tokens) live in a
//! [`HandleStore`] keyed by an opaque handle, and remembered consent lives in
//! a [`ConsentStore`].
//!
//! # Implementation Notes
//!
//! - [`HandleStore::take`] must be atomic. Two concurrent calls for the same
//!   handle must never both return the item; authorization code redemption
//!   depends on it.
//! - [`HandleStore::replace`] must never resurrect a removed handle. Refresh
//!   tokens kept under [`TokenUsage::ReUse`](crate::types::TokenUsage::ReUse)
//!   are written back through it.
//! - Expired items are never returned. Implementations delete them when they
//!   encounter them.
//! - Store failures surface as [`AuthError::Storage`](crate::AuthError::Storage).
//!   The engine does not retry.

pub mod caching;
pub mod memory;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::types::{AuthorizationCode, Client, Consent, RefreshToken, Scope, Token};

pub use caching::{CachingClientStore, CachingScopeStore};
pub use memory::{InMemoryClientStore, InMemoryConsentStore, InMemoryHandleStore, InMemoryScopeStore};

/// Resolves client registrations.
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Returns the client with `client_id`, enabled or not.
    async fn find_client_by_id(&self, client_id: &str) -> AuthResult<Option<Client>>;
}

/// Resolves scope definitions.
#[async_trait]
pub trait ScopeStore: Send + Sync {
    /// Returns the scopes whose name is in `names`. Unknown names are skipped.
    async fn find_scopes_by_names(&self, names: &[String]) -> AuthResult<Vec<Scope>>;

    /// Returns every scope, or only those shown in the discovery document.
    async fn get_scopes(&self, public_only: bool) -> AuthResult<Vec<Scope>>;
}

/// An item kept under an opaque handle.
pub trait HandleItem: Clone + Send + Sync + 'static {
    /// The subject the item was issued for, if any.
    fn subject_id(&self) -> Option<&str>;

    fn client_id(&self) -> &str;

    fn expires_at(&self) -> OffsetDateTime;
}

impl HandleItem for AuthorizationCode {
    fn subject_id(&self) -> Option<&str> {
        Some(&self.subject().subject_id)
    }

    fn client_id(&self) -> &str {
        AuthorizationCode::client_id(self)
    }

    fn expires_at(&self) -> OffsetDateTime {
        AuthorizationCode::expires_at(self)
    }
}

impl HandleItem for Token {
    fn subject_id(&self) -> Option<&str> {
        Token::subject_id(self)
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn expires_at(&self) -> OffsetDateTime {
        Token::expires_at(self)
    }
}

impl HandleItem for RefreshToken {
    fn subject_id(&self) -> Option<&str> {
        Some(&self.subject.subject_id)
    }

    fn client_id(&self) -> &str {
        RefreshToken::client_id(self)
    }

    fn expires_at(&self) -> OffsetDateTime {
        RefreshToken::expires_at(self)
    }
}

/// Handle-keyed storage with TTL semantics.
#[async_trait]
pub trait HandleStore<T: HandleItem>: Send + Sync {
    /// Stores `item` under `handle`, replacing any previous item.
    async fn store(&self, handle: &str, item: T) -> AuthResult<()>;

    /// Overwrites the item under `handle` only if a live item is still there.
    ///
    /// Returns `false` when the handle was removed or expired. Check and write
    /// are a single step, so a concurrent `remove` either happens before and
    /// wins, or after and deletes the new item.
    async fn replace(&self, handle: &str, item: T) -> AuthResult<bool>;

    /// Returns the item if present and unexpired.
    async fn get(&self, handle: &str) -> AuthResult<Option<T>>;

    /// Atomically removes and returns the item.
    ///
    /// Concurrent calls for the same handle return `Some` to at most one caller.
    async fn take(&self, handle: &str) -> AuthResult<Option<T>>;

    /// Removes the item. Returns `true` if something was removed.
    async fn remove(&self, handle: &str) -> AuthResult<bool>;

    /// Every unexpired item issued for `subject_id`.
    async fn get_all(&self, subject_id: &str) -> AuthResult<Vec<T>>;

    /// Removes every item of `subject_id` issued to `client_id`.
    async fn revoke(&self, subject_id: &str, client_id: &str) -> AuthResult<usize>;
}

pub type AuthorizationCodeStore = dyn HandleStore<AuthorizationCode>;
pub type TokenHandleStore = dyn HandleStore<Token>;
pub type RefreshTokenStore = dyn HandleStore<RefreshToken>;

/// Remembered consent decisions.
#[async_trait]
pub trait ConsentStore: Send + Sync {
    async fn load(&self, subject_id: &str, client_id: &str) -> AuthResult<Option<Consent>>;

    async fn update(&self, consent: Consent) -> AuthResult<()>;

    async fn revoke(&self, subject_id: &str, client_id: &str) -> AuthResult<()>;
}
