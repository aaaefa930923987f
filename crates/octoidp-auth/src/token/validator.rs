//! Validation of presented access and identity tokens.
//!
//! # Access tokens
//!
//! ```text
//! length cap ─┬─ JWT (two dots) ──► signature, iss, aud ──► exp / nbf ─┐
//!             └─ handle ──────────► token handle store ───► expiry ────┤
//!                                                                       ▼
//!                         required scope ──► client enabled ──► subject active
//! ```
//!
//! Verified JWT claim sets are cached for `caching.validated_jwt_ttl`;
//! `exp` is checked again on every cache hit. Every failure is a typed
//! [`AuthError`], a malformed token never panics.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use super::signing::{JwtExpectations, JwtService};
use crate::AuthResult;
use crate::cache::SingleFlightCache;
use crate::cancellation::cancellable;
use crate::clock::SharedClock;
use crate::config::IdpOptions;
use crate::error::AuthError;
use crate::services::UserService;
use crate::storage::{ClientStore, TokenHandleStore};
use crate::types::{Client, Token, claim_types};

type ClaimSet = Arc<Map<String, Value>>;

/// The outcome of a successful validation.
#[derive(Debug, Clone)]
pub struct TokenValidationResult {
    /// The token's claim set (JWT payload, or the reference token's claims).
    pub claims: Map<String, Value>,
    pub client: Client,
    /// Present for reference tokens.
    pub reference_token: Option<Token>,
    /// Present for JWTs.
    pub jwt: Option<String>,
}

impl TokenValidationResult {
    #[must_use]
    pub fn subject_id(&self) -> Option<&str> {
        self.claims.get(claim_types::SUBJECT).and_then(Value::as_str)
    }

    /// Scope names, from a JSON array or a space-delimited string.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        scopes_of(&self.claims)
    }

    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().iter().any(|s| s == scope)
    }
}

fn scopes_of(claims: &Map<String, Value>) -> Vec<String> {
    match claims.get(claim_types::SCOPE) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(value)) => value.split_whitespace().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn is_jwt_shaped(token: &str) -> bool {
    token.matches('.').count() == 2
}

/// Validates access tokens and identity tokens.
#[derive(Clone)]
pub struct TokenValidator {
    issuer: String,
    access_token_audience: String,
    max_jwt_length: usize,
    max_handle_length: usize,
    clock_skew: i64,
    jwt: Arc<JwtService>,
    handles: Arc<TokenHandleStore>,
    clients: Arc<dyn ClientStore>,
    users: Arc<dyn UserService>,
    jwt_cache: Option<SingleFlightCache<String, ClaimSet>>,
    clock: SharedClock,
}

impl TokenValidator {
    #[must_use]
    pub fn new(
        options: &IdpOptions,
        jwt: Arc<JwtService>,
        handles: Arc<TokenHandleStore>,
        clients: Arc<dyn ClientStore>,
        users: Arc<dyn UserService>,
        clock: SharedClock,
    ) -> Self {
        let caching = &options.caching;
        let jwt_cache = (caching.enabled && caching.validated_jwt_ttl > Duration::ZERO)
            .then(|| SingleFlightCache::new(caching.max_capacity, caching.validated_jwt_ttl));
        Self {
            issuer: options.issuer().to_string(),
            access_token_audience: options.access_token_audience(),
            max_jwt_length: options.input_lengths.jwt,
            max_handle_length: options.input_lengths.token_handle,
            clock_skew: i64::try_from(options.clock_skew.as_secs()).unwrap_or(i64::MAX),
            jwt,
            handles,
            clients,
            users,
            jwt_cache,
            clock,
        }
    }

    /// Validates an access token, optionally requiring `required_scope`.
    ///
    /// # Errors
    ///
    /// - `AuthError::InvalidToken` for oversized, malformed, unknown or
    ///   forged tokens, disabled clients and inactive subjects
    /// - `AuthError::TokenExpired` once the token's lifetime has passed
    /// - `AuthError::InsufficientScope` if `required_scope` is missing
    pub async fn validate_access_token(
        &self,
        token: &str,
        required_scope: Option<&str>,
        cancel: &CancellationToken,
    ) -> AuthResult<TokenValidationResult> {
        if token.len() > self.max_jwt_length.max(self.max_handle_length) {
            tracing::warn!(length = token.len(), "Token exceeds maximum length");
            return Err(AuthError::invalid_token("Token too long"));
        }
        let (claims, reference_token, jwt) = if is_jwt_shaped(token) {
            if token.len() > self.max_jwt_length {
                tracing::warn!(length = token.len(), "JWT exceeds maximum length");
                return Err(AuthError::invalid_token("Token too long"));
            }
            let claims = self.verify_access_jwt(token).await?;
            self.check_lifetime(&claims)?;
            ((*claims).clone(), None, Some(token.to_string()))
        } else {
            if token.is_empty() || token.len() > self.max_handle_length {
                tracing::warn!(length = token.len(), "Token handle has invalid length");
                return Err(AuthError::invalid_token("Invalid token handle"));
            }
            let stored = self.load_reference_token(token, cancel).await?;
            (stored.to_claims_object(), Some(stored), None)
        };

        let scopes = scopes_of(&claims);
        if let Some(required) = required_scope {
            if !scopes.iter().any(|scope| scope == required) {
                tracing::debug!(required, ?scopes, "Required scope not in token");
                return Err(AuthError::insufficient_scope(format!(
                    "Scope {required} required"
                )));
            }
        }

        let client_id = claims
            .get(claim_types::CLIENT_ID)
            .and_then(Value::as_str)
            .ok_or_else(|| AuthError::invalid_token("Token has no client_id"))?;
        let client = self.enabled_client(client_id, cancel).await?;
        self.check_subject_active(&claims, &client, cancel).await?;

        Ok(TokenValidationResult {
            claims,
            client,
            reference_token,
            jwt,
        })
    }

    /// Validates an identity token issued to `client_id`.
    ///
    /// Without a `client_id` the audience of the token names the client.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidToken` for anything but a valid JWT of an
    /// enabled client with an active subject, and `AuthError::TokenExpired`
    /// when `validate_lifetime` is set and the token has expired.
    pub async fn validate_identity_token(
        &self,
        token: &str,
        client_id: Option<&str>,
        validate_lifetime: bool,
        cancel: &CancellationToken,
    ) -> AuthResult<TokenValidationResult> {
        if token.len() > self.max_jwt_length || !is_jwt_shaped(token) {
            return Err(AuthError::invalid_token("Malformed identity token"));
        }

        let mut expectations = JwtExpectations::issuer(&self.issuer);
        if let Some(client_id) = client_id {
            expectations = expectations.with_audience(client_id);
        }
        let claims = self.jwt.decode(token, &expectations).map_err(|err| {
            tracing::debug!(%err, "Identity token rejected");
            AuthError::from(err)
        })?;

        let audience = match client_id {
            Some(client_id) => client_id.to_string(),
            None => audience_of(&claims)
                .ok_or_else(|| AuthError::invalid_token("Identity token has no audience"))?,
        };
        let client = self.enabled_client(&audience, cancel).await?;

        if validate_lifetime {
            self.check_lifetime(&claims)?;
        }
        if claims.get(claim_types::SUBJECT).and_then(Value::as_str).is_none() {
            return Err(AuthError::invalid_token("Identity token has no subject"));
        }
        self.check_subject_active(&claims, &client, cancel).await?;

        Ok(TokenValidationResult {
            claims,
            client,
            reference_token: None,
            jwt: Some(token.to_string()),
        })
    }

    async fn verify_access_jwt(&self, token: &str) -> AuthResult<ClaimSet> {
        let verify = move || async move {
            let expectations =
                JwtExpectations::issuer(&self.issuer).with_audience(&self.access_token_audience);
            self.jwt
                .decode(token, &expectations)
                .map(Arc::new)
                .map_err(|err| {
                    tracing::debug!(%err, "Access token JWT rejected");
                    AuthError::from(err)
                })
        };
        match &self.jwt_cache {
            Some(cache) => cache.get_or_compute(token.to_string(), verify).await,
            None => verify().await,
        }
    }

    async fn load_reference_token(&self, handle: &str, cancel: &CancellationToken) -> AuthResult<Token> {
        let Some(token) = cancellable(cancel, self.handles.get(handle)).await? else {
            tracing::debug!("Reference token not found");
            return Err(AuthError::invalid_token("Invalid reference token"));
        };
        if token.is_expired(self.clock.now()) {
            cancellable(cancel, self.handles.remove(handle)).await?;
            return Err(AuthError::TokenExpired);
        }
        Ok(token)
    }

    fn check_lifetime(&self, claims: &Map<String, Value>) -> AuthResult<()> {
        let now = self.clock.now().unix_timestamp();
        let exp = claims
            .get(claim_types::EXPIRATION)
            .and_then(Value::as_i64)
            .ok_or_else(|| AuthError::invalid_token("Token has no exp"))?;
        if now >= exp.saturating_add(self.clock_skew) {
            return Err(AuthError::TokenExpired);
        }
        if let Some(nbf) = claims.get(claim_types::NOT_BEFORE).and_then(Value::as_i64) {
            if nbf > now.saturating_add(self.clock_skew) {
                return Err(AuthError::invalid_token("Token not yet valid"));
            }
        }
        Ok(())
    }

    async fn enabled_client(&self, client_id: &str, cancel: &CancellationToken) -> AuthResult<Client> {
        cancellable(cancel, self.clients.find_client_by_id(client_id))
            .await?
            .filter(|client| client.enabled)
            .ok_or_else(|| {
                tracing::warn!(client_id, "Token of unknown or disabled client");
                AuthError::invalid_token("Client deleted or disabled")
            })
    }

    async fn check_subject_active(
        &self,
        claims: &Map<String, Value>,
        client: &Client,
        cancel: &CancellationToken,
    ) -> AuthResult<()> {
        let Some(subject_id) = claims.get(claim_types::SUBJECT).and_then(Value::as_str) else {
            return Ok(());
        };
        if cancellable(cancel, self.users.is_active(subject_id, client)).await? {
            Ok(())
        } else {
            tracing::warn!(sub = subject_id, "Token of inactive subject");
            Err(AuthError::invalid_token("User marked as not active"))
        }
    }

    /// Seconds until `claims` expire, for introspection and userinfo callers.
    #[must_use]
    pub fn remaining_lifetime(&self, claims: &Map<String, Value>) -> Option<i64> {
        let exp = claims.get(claim_types::EXPIRATION).and_then(Value::as_i64)?;
        Some(exp - self.clock.now().unix_timestamp())
    }

    #[must_use]
    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }
}

fn audience_of(claims: &Map<String, Value>) -> Option<String> {
    match claims.get(claim_types::AUDIENCE)? {
        Value::String(audience) => Some(audience.clone()),
        Value::Array(values) => values.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("issuer", &self.issuer)
            .field("jwt_cache", &self.jwt_cache.is_some())
            .finish_non_exhaustive()
    }
}
