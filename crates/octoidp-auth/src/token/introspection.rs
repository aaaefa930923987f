//! Token introspection (RFC 7662)
//!
//! Resource scopes introspect access tokens with their scope secret. A token
//! is reported active only when it validates and carries the introspecting
//! scope. The `scope` claim is reduced to that scope unless the scope
//! allows unrestricted introspection.
//!
//! # Security Considerations
//!
//! - Never reveal why a token is inactive (expired vs revoked vs invalid)
//! - Server-side failures (storage, cancellation) are errors, not `active: false`

use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::validator::TokenValidator;
use crate::AuthResult;
use crate::types::{Scope, claim_types};

// =============================================================================
// Response Types
// =============================================================================

/// Token introspection response per RFC 7662.
///
/// Inactive responses carry nothing but `active: false`.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct IntrospectionResponse {
    pub active: bool,

    /// The token's claims, `scope` as a space-delimited string.
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

impl IntrospectionResponse {
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn active(claims: Map<String, Value>) -> Self {
        Self {
            active: true,
            claims,
        }
    }

    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.claims.get(claim_types::SCOPE).and_then(Value::as_str)
    }
}

// =============================================================================
// Service
// =============================================================================

/// Answers introspection requests of authenticated resource scopes.
#[derive(Debug, Clone)]
pub struct IntrospectionService {
    validator: TokenValidator,
}

impl IntrospectionService {
    #[must_use]
    pub fn new(validator: TokenValidator) -> Self {
        Self { validator }
    }

    /// Introspects `token` on behalf of `scope`.
    ///
    /// # Errors
    ///
    /// Only server-side failures are returned; every client-side validation
    /// failure yields [`IntrospectionResponse::inactive`].
    pub async fn introspect(
        &self,
        scope: &Scope,
        token: &str,
        cancel: &CancellationToken,
    ) -> AuthResult<IntrospectionResponse> {
        let result = match self.validator.validate_access_token(token, None, cancel).await {
            Ok(result) => result,
            Err(err) if err.is_server_error() => return Err(err),
            Err(err) => {
                tracing::debug!(scope = %scope.name, error = %err, "Introspected token is inactive");
                return Ok(IntrospectionResponse::inactive());
            }
        };

        let scopes = result.scopes();
        if !scopes.iter().any(|name| *name == scope.name) {
            tracing::debug!(scope = %scope.name, "Introspected token lacks the calling scope");
            return Ok(IntrospectionResponse::inactive());
        }

        let granted = if scope.allow_unrestricted_introspection {
            scopes.join(" ")
        } else {
            scope.name.clone()
        };
        let mut claims = result.claims;
        claims.insert(claim_types::SCOPE.to_string(), Value::String(granted));

        tracing::debug!(scope = %scope.name, client_id = %result.client.client_id, "Token introspected");
        Ok(IntrospectionResponse::active(claims))
    }
}
