//! Token revocation (RFC 7009)
//!
//! Reference access tokens and refresh tokens can be revoked by the client
//! they were issued to. JWT access tokens are self-contained and expire on
//! their own.
//!
//! # Security Considerations
//!
//! - Unknown tokens, and tokens of other clients, are accepted silently
//!   so the response never reveals whether a token exists
//! - Client must own the token to revoke it

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::AuthResult;
use crate::cancellation::cancellable;
use crate::error::AuthError;
use crate::events::EventService;
use crate::storage::{HandleItem, HandleStore, RefreshTokenStore, TokenHandleStore};
use crate::types::Client;

// =============================================================================
// Request Types
// =============================================================================

/// Token type hint for revocation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTypeHint {
    /// The token is an access token.
    AccessToken,
    /// The token is a refresh token.
    RefreshToken,
}

impl TokenTypeHint {
    /// Parses a hint, rejecting values this server cannot revoke.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UnsupportedTokenType` for any other value.
    pub fn parse(hint: &str) -> AuthResult<Self> {
        match hint {
            "access_token" => Ok(Self::AccessToken),
            "refresh_token" => Ok(Self::RefreshToken),
            other => Err(AuthError::unsupported_token_type(other)),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl std::fmt::Display for TokenTypeHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Service
// =============================================================================

/// Revokes reference and refresh tokens.
#[derive(Clone)]
pub struct RevocationService {
    token_handles: Arc<TokenHandleStore>,
    refresh_tokens: Arc<RefreshTokenStore>,
    events: EventService,
}

impl RevocationService {
    #[must_use]
    pub fn new(
        token_handles: Arc<TokenHandleStore>,
        refresh_tokens: Arc<RefreshTokenStore>,
        events: EventService,
    ) -> Self {
        Self {
            token_handles,
            refresh_tokens,
            events,
        }
    }

    /// Revokes `token` for `client`.
    ///
    /// Without a hint both token kinds are tried, access tokens first.
    /// Returns whether a token was removed; callers answer 200 either way.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UnsupportedTokenType` for an unknown hint and
    /// propagates store failures.
    pub async fn revoke(
        &self,
        client: &Client,
        token: &str,
        token_type_hint: Option<&str>,
        cancel: &CancellationToken,
    ) -> AuthResult<bool> {
        let order: &[TokenTypeHint] = match token_type_hint.map(TokenTypeHint::parse).transpose()? {
            Some(TokenTypeHint::AccessToken) | None => {
                &[TokenTypeHint::AccessToken, TokenTypeHint::RefreshToken]
            }
            Some(TokenTypeHint::RefreshToken) => {
                &[TokenTypeHint::RefreshToken, TokenTypeHint::AccessToken]
            }
        };

        for kind in order {
            let revoked = match kind {
                TokenTypeHint::AccessToken => {
                    revoke_owned(self.token_handles.as_ref(), token, client, cancel).await?
                }
                TokenTypeHint::RefreshToken => {
                    revoke_owned(self.refresh_tokens.as_ref(), token, client, cancel).await?
                }
            };
            if revoked {
                tracing::info!(client_id = %client.client_id, kind = %kind, "Token revoked");
                self.events.token_revoked(&client.client_id, kind.as_str());
                return Ok(true);
            }
        }

        tracing::debug!(client_id = %client.client_id, "Revocation of unknown token");
        Ok(false)
    }
}

async fn revoke_owned<T: HandleItem>(
    store: &dyn HandleStore<T>,
    handle: &str,
    client: &Client,
    cancel: &CancellationToken,
) -> AuthResult<bool> {
    let Some(item) = cancellable(cancel, store.get(handle)).await? else {
        return Ok(false);
    };
    if item.client_id() != client.client_id {
        tracing::warn!(
            client_id = %client.client_id,
            owner = item.client_id(),
            "Client tried to revoke a token of another client"
        );
        return Ok(false);
    }
    cancellable(cancel, store.remove(handle)).await
}

impl std::fmt::Debug for RevocationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationService").finish_non_exhaustive()
    }
}
