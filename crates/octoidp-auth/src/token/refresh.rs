//! Refresh token issuance and rotation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::AuthResult;
use crate::cancellation::cancellable;
use crate::clock::SharedClock;
use crate::crypto::generate_handle;
use crate::error::AuthError;
use crate::events::EventService;
use crate::storage::RefreshTokenStore;
use crate::types::{Client, RefreshToken, Subject, Token, TokenExpiration, TokenUsage};

/// Creates refresh tokens and applies the client's usage/expiration policy
/// when they are redeemed.
#[derive(Clone)]
pub struct RefreshTokenService {
    store: Arc<RefreshTokenStore>,
    events: EventService,
    clock: SharedClock,
}

impl RefreshTokenService {
    #[must_use]
    pub fn new(store: Arc<RefreshTokenStore>, events: EventService, clock: SharedClock) -> Self {
        Self {
            store,
            events,
            clock,
        }
    }

    fn initial_lifetime(client: &Client) -> u64 {
        match client.refresh_token_expiration {
            TokenExpiration::Absolute => client.absolute_refresh_token_lifetime,
            TokenExpiration::Sliding => client
                .sliding_refresh_token_lifetime
                .min(client.absolute_refresh_token_lifetime),
        }
    }

    /// Stores a new refresh token for `access_token` and returns its handle.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn create_refresh_token(
        &self,
        subject: &Subject,
        access_token: &Token,
        client: &Client,
        cancel: &CancellationToken,
    ) -> AuthResult<String> {
        let lifetime = Self::initial_lifetime(client);
        let refresh_token = RefreshToken {
            access_token: access_token.clone(),
            subject: subject.clone(),
            created_at: self.clock.now(),
            lifetime,
            version: 1,
        };

        let handle = generate_handle();
        cancellable(cancel, self.store.store(&handle, refresh_token)).await?;

        tracing::debug!(client_id = %client.client_id, sub = %subject.subject_id, lifetime, "Refresh token issued");
        self.events
            .refresh_token_issued(&client.client_id, &subject.subject_id, lifetime);
        Ok(handle)
    }

    /// Applies a refresh to the token stored under `handle`.
    ///
    /// `refresh_token` is the validated current value; `access_token` replaces
    /// the stored access token when claims were recomputed. Under
    /// [`TokenUsage::OneTimeOnly`] the old handle is consumed atomically and a
    /// new handle returned, so concurrent refreshes with one handle succeed
    /// once. Under [`TokenExpiration::Sliding`] the lifetime is extended, never
    /// past the absolute lifetime.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidGrant` if the handle was consumed or
    /// revoked concurrently, and propagates store failures.
    pub async fn update_refresh_token(
        &self,
        handle: &str,
        mut refresh_token: RefreshToken,
        access_token: Option<Token>,
        client: &Client,
        cancel: &CancellationToken,
    ) -> AuthResult<String> {
        if let Some(access_token) = access_token {
            refresh_token.access_token = access_token;
        }
        refresh_token.version = refresh_token.version.saturating_add(1);

        if client.refresh_token_expiration == TokenExpiration::Sliding {
            let elapsed = (self.clock.now() - refresh_token.created_at).whole_seconds();
            let elapsed = u64::try_from(elapsed).unwrap_or_default();
            refresh_token.lifetime = elapsed
                .saturating_add(client.sliding_refresh_token_lifetime)
                .min(client.absolute_refresh_token_lifetime);
        }

        let rotated = client.refresh_token_usage == TokenUsage::OneTimeOnly;
        let version = refresh_token.version;
        let new_handle = if rotated {
            if cancellable(cancel, self.store.take(handle)).await?.is_none() {
                tracing::warn!(client_id = %client.client_id, "Refresh token already redeemed");
                return Err(AuthError::invalid_grant("Invalid refresh token"));
            }
            let new_handle = generate_handle();
            cancellable(cancel, self.store.store(&new_handle, refresh_token)).await?;
            new_handle
        } else {
            if !cancellable(cancel, self.store.replace(handle, refresh_token)).await? {
                tracing::warn!(client_id = %client.client_id, "Refresh token revoked during refresh");
                return Err(AuthError::invalid_grant("Invalid refresh token"));
            }
            handle.to_string()
        };

        tracing::debug!(client_id = %client.client_id, version, rotated, "Refresh token updated");
        self.events
            .refresh_token_refreshed(&client.client_id, version, rotated);
        Ok(new_handle)
    }
}

impl std::fmt::Debug for RefreshTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenService").finish_non_exhaustive()
    }
}
