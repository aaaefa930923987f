//! Client and resource scope authentication.
//!
//! Credentials are read in priority order:
//!
//! 1. HTTP Basic `Authorization` header
//! 2. `client_id` / `client_secret` form fields
//! 3. `client_id` alone (clients that do not require a secret)
//!
//! Every failure is `invalid_client`; the description never says whether the
//! client exists.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio_util::sync::CancellationToken;

use crate::AuthResult;
use crate::cancellation::cancellable;
use crate::clock::SharedClock;
use crate::config::InputLengthRestrictions;
use crate::error::AuthError;
use crate::storage::{ClientStore, ScopeStore};
use crate::types::{Client, RequestParameters, Scope, any_secret_matches};

/// Where credentials were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    BasicHeader,
    PostBody,
    ClientIdOnly,
}

/// An identifier with an optional shared secret.
#[derive(Clone)]
pub struct ParsedSecret {
    pub id: String,
    pub secret: Option<String>,
    pub source: CredentialSource,
}

impl fmt::Debug for ParsedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedSecret")
            .field("id", &self.id)
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .field("source", &self.source)
            .finish()
    }
}

fn parse_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

/// Extracts credentials from the `Authorization` header value and the form.
///
/// Returns `None` if no credentials are present or they violate the
/// configured length limits.
#[must_use]
pub fn parse_client_credentials(
    authorization: Option<&str>,
    parameters: &RequestParameters,
    lengths: &InputLengthRestrictions,
) -> Option<ParsedSecret> {
    let parsed = if let Some((id, secret)) = authorization.and_then(parse_basic) {
        ParsedSecret {
            id,
            secret: Some(secret),
            source: CredentialSource::BasicHeader,
        }
    } else {
        let id = parameters.get("client_id")?.to_string();
        match parameters.get("client_secret") {
            Some(secret) => ParsedSecret {
                id,
                secret: Some(secret.to_string()),
                source: CredentialSource::PostBody,
            },
            None => ParsedSecret {
                id,
                secret: None,
                source: CredentialSource::ClientIdOnly,
            },
        }
    };

    if parsed.id.is_empty() || parsed.id.len() > lengths.client_id {
        return None;
    }
    if parsed
        .secret
        .as_ref()
        .is_some_and(|secret| secret.len() > lengths.client_secret)
    {
        return None;
    }
    Some(parsed)
}

// =============================================================================
// Clients
// =============================================================================

/// Authenticates clients at the token and revocation endpoints.
#[derive(Clone)]
pub struct ClientAuthenticator {
    clients: Arc<dyn ClientStore>,
    lengths: InputLengthRestrictions,
    clock: SharedClock,
}

impl ClientAuthenticator {
    #[must_use]
    pub fn new(
        clients: Arc<dyn ClientStore>,
        lengths: InputLengthRestrictions,
        clock: SharedClock,
    ) -> Self {
        Self {
            clients,
            lengths,
            clock,
        }
    }

    /// Returns the authenticated, enabled client.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidClient` on any authentication failure and
    /// propagates store failures.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        parameters: &RequestParameters,
        cancel: &CancellationToken,
    ) -> AuthResult<Client> {
        let Some(credentials) = parse_client_credentials(authorization, parameters, &self.lengths)
        else {
            tracing::debug!("No usable client credentials in request");
            return Err(AuthError::invalid_client("Client authentication failed"));
        };

        let client = cancellable(cancel, self.clients.find_client_by_id(&credentials.id))
            .await?
            .filter(|client| client.enabled);
        let Some(client) = client else {
            tracing::warn!(client_id = %credentials.id, "Unknown or disabled client");
            return Err(AuthError::invalid_client("Client authentication failed"));
        };

        if client.require_client_secret {
            let presented = credentials.secret.as_deref().unwrap_or_default();
            if presented.is_empty()
                || !any_secret_matches(&client.client_secrets, presented, self.clock.now())
            {
                tracing::warn!(
                    client_id = %client.client_id,
                    source = ?credentials.source,
                    "Client secret validation failed"
                );
                return Err(AuthError::invalid_client("Client authentication failed"));
            }
        }

        tracing::debug!(client_id = %client.client_id, source = ?credentials.source, "Client authenticated");
        Ok(client)
    }
}

impl fmt::Debug for ClientAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAuthenticator").finish_non_exhaustive()
    }
}

// =============================================================================
// Resource scopes
// =============================================================================

/// Authenticates a resource scope with one of its scope secrets.
///
/// Used by the introspection endpoint, where the caller is an API rather than
/// a client.
#[derive(Clone)]
pub struct ScopeSecretValidator {
    scopes: Arc<dyn ScopeStore>,
    lengths: InputLengthRestrictions,
    clock: SharedClock,
}

impl ScopeSecretValidator {
    #[must_use]
    pub fn new(
        scopes: Arc<dyn ScopeStore>,
        lengths: InputLengthRestrictions,
        clock: SharedClock,
    ) -> Self {
        Self {
            scopes,
            lengths,
            clock,
        }
    }

    /// Returns the authenticated resource scope.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidClient` on any authentication failure.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        parameters: &RequestParameters,
        cancel: &CancellationToken,
    ) -> AuthResult<Scope> {
        let credentials = parse_client_credentials(authorization, parameters, &self.lengths)
            .filter(|credentials| credentials.secret.is_some())
            .ok_or_else(|| AuthError::invalid_client("Scope authentication failed"))?;

        let names = [credentials.id.clone()];
        let scope = cancellable(cancel, self.scopes.find_scopes_by_names(&names))
            .await?
            .into_iter()
            .find(|scope| scope.name == credentials.id && scope.enabled && !scope.is_identity());
        let Some(scope) = scope else {
            tracing::warn!(scope = %credentials.id, "Unknown scope at introspection");
            return Err(AuthError::invalid_client("Scope authentication failed"));
        };

        let presented = credentials.secret.as_deref().unwrap_or_default();
        if !any_secret_matches(&scope.scope_secrets, presented, self.clock.now()) {
            tracing::warn!(scope = %scope.name, "Scope secret validation failed");
            return Err(AuthError::invalid_client("Scope authentication failed"));
        }
        Ok(scope)
    }
}

impl fmt::Debug for ScopeSecretValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeSecretValidator").finish_non_exhaustive()
    }
}
