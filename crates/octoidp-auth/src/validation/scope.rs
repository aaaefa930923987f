//! Scope parsing and validation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::AuthResult;
use crate::cancellation::cancellable;
use crate::error::AuthError;
use crate::storage::ScopeStore;
use crate::types::{Client, Scope, scope_names};

/// Splits a space-delimited `scope` parameter.
///
/// Duplicates are dropped, the first occurrence keeps its position. Returns
/// `None` for an absent or blank parameter.
#[must_use]
pub fn parse_scopes(scope: Option<&str>) -> Option<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for name in scope?.split_whitespace() {
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    if names.is_empty() { None } else { Some(names) }
}

/// Scopes that exist, are enabled and are allowed for the client.
#[derive(Debug, Clone, Default)]
pub struct ValidatedScopes {
    scopes: Vec<Scope>,
}

impl ValidatedScopes {
    #[must_use]
    pub fn new(scopes: Vec<Scope>) -> Self {
        Self { scopes }
    }

    #[must_use]
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// Scope names in request order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.scopes.iter().map(|scope| scope.name.clone()).collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.name == name)
    }

    #[must_use]
    pub fn contains_open_id(&self) -> bool {
        self.contains(scope_names::OPENID)
    }

    #[must_use]
    pub fn contains_offline_access(&self) -> bool {
        self.contains(scope_names::OFFLINE_ACCESS)
    }

    #[must_use]
    pub fn contains_identity_scopes(&self) -> bool {
        self.scopes.iter().any(Scope::is_identity)
    }

    /// Resource scopes other than `offline_access`.
    #[must_use]
    pub fn contains_resource_scopes(&self) -> bool {
        self.scopes
            .iter()
            .any(|scope| !scope.is_identity() && scope.name != scope_names::OFFLINE_ACCESS)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Drops the identity scopes.
    #[must_use]
    pub fn without_identity_scopes(mut self) -> Self {
        self.scopes.retain(|scope| !scope.is_identity());
        self
    }
}

/// Resolves requested scope names against the scope store and the client.
#[derive(Clone)]
pub struct ScopeValidator {
    scopes: Arc<dyn ScopeStore>,
}

impl ScopeValidator {
    #[must_use]
    pub fn new(scopes: Arc<dyn ScopeStore>) -> Self {
        Self { scopes }
    }

    /// Validates every requested scope.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidScope` for an unknown, disabled or
    /// disallowed scope, and propagates store failures.
    pub async fn validate(
        &self,
        requested: &[String],
        client: &Client,
        cancel: &CancellationToken,
    ) -> AuthResult<ValidatedScopes> {
        if requested.is_empty() {
            return Err(AuthError::invalid_scope("No scopes requested"));
        }

        let known = cancellable(cancel, self.scopes.find_scopes_by_names(requested)).await?;

        let mut validated = Vec::with_capacity(requested.len());
        for name in requested {
            let Some(scope) = known.iter().find(|scope| &scope.name == name && scope.enabled) else {
                tracing::warn!(client_id = %client.client_id, scope = %name, "Unknown or disabled scope");
                return Err(AuthError::invalid_scope(format!("Invalid scope: {name}")));
            };
            if !client.is_scope_allowed(name) {
                tracing::warn!(client_id = %client.client_id, scope = %name, "Scope not allowed for client");
                return Err(AuthError::invalid_scope(format!("Invalid scope: {name}")));
            }
            validated.push(scope.clone());
        }

        Ok(ValidatedScopes::new(validated))
    }

    /// The scopes of the client when a token request omits `scope`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn client_default_scopes(
        &self,
        client: &Client,
        cancel: &CancellationToken,
    ) -> AuthResult<ValidatedScopes> {
        let scopes = if client.allow_access_to_all_scopes {
            cancellable(cancel, self.scopes.get_scopes(false)).await?
        } else {
            cancellable(cancel, self.scopes.find_scopes_by_names(&client.allowed_scopes)).await?
        };
        Ok(ValidatedScopes::new(
            scopes.into_iter().filter(|scope| scope.enabled).collect(),
        ))
    }
}

impl std::fmt::Debug for ScopeValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeValidator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryScopeStore;
    use crate::types::StandardScopes;

    fn validator() -> ScopeValidator {
        let mut disabled = Scope::resource("legacy");
        disabled.enabled = false;
        let mut scopes = StandardScopes::all();
        scopes.extend([Scope::resource("read"), Scope::resource("write"), Scope::resource("admin"), disabled]);
        ScopeValidator::new(Arc::new(InMemoryScopeStore::new(scopes)))
    }

    fn client() -> Client {
        Client {
            client_id: "c1".to_string(),
            allowed_scopes: vec![
                "openid".to_string(),
                "read".to_string(),
                "write".to_string(),
                "legacy".to_string(),
            ],
            ..Client::default()
        }
    }

    fn names(scope: &str) -> Vec<String> {
        parse_scopes(Some(scope)).unwrap()
    }

    #[test]
    fn test_parse_scopes() {
        assert_eq!(names("read  write read"), vec!["read", "write"]);
        assert_eq!(parse_scopes(Some("   ")), None);
        assert_eq!(parse_scopes(None), None);
    }

    #[tokio::test]
    async fn test_allowed_scopes_pass() {
        let cancel = CancellationToken::new();
        let validated = validator()
            .validate(&names("read write"), &client(), &cancel)
            .await
            .unwrap();
        assert_eq!(validated.names(), vec!["read", "write"]);
        assert!(validated.contains_resource_scopes());
        assert!(!validated.contains_open_id());
    }

    #[tokio::test]
    async fn test_disallowed_unknown_or_disabled_scope_fails() {
        let cancel = CancellationToken::new();
        let validator = validator();
        for request in ["read admin", "read unknown", "legacy"] {
            let result = validator.validate(&names(request), &client(), &cancel).await;
            assert!(
                matches!(result, Err(AuthError::InvalidScope { .. })),
                "{request} should fail"
            );
        }
    }

    #[tokio::test]
    async fn test_client_default_scopes() {
        let cancel = CancellationToken::new();
        let defaults = validator()
            .client_default_scopes(&client(), &cancel)
            .await
            .unwrap();
        assert_eq!(defaults.names(), vec!["openid", "read", "write"]);
    }
}
