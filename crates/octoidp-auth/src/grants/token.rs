//! Token endpoint response generation.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::AuthResult;
use crate::clock::SharedClock;
use crate::error::AuthError;
use crate::token::{RefreshTokenService, TokenCreationRequest, TokenFactory, TokenSigningService};
use crate::types::{GrantType, Subject, Token};
use crate::validation::ValidatedTokenRequest;

/// Successful token endpoint response (RFC 6749 §5.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// `Bearer`, or `pop` for proof-of-possession tokens.
    pub token_type: String,
    /// Seconds.
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Issues tokens for validated token requests.
#[derive(Clone)]
pub struct TokenResponseGenerator {
    factory: TokenFactory,
    signing: TokenSigningService,
    refresh: RefreshTokenService,
    clock: SharedClock,
}

impl TokenResponseGenerator {
    #[must_use]
    pub fn new(
        factory: TokenFactory,
        signing: TokenSigningService,
        refresh: RefreshTokenService,
        clock: SharedClock,
    ) -> Self {
        Self {
            factory,
            signing,
            refresh,
            clock,
        }
    }

    /// # Errors
    ///
    /// Returns `AuthError::InvalidGrant` if a one-time refresh token was
    /// redeemed concurrently, and propagates claims, signing and store
    /// failures.
    pub async fn generate(
        &self,
        request: &ValidatedTokenRequest,
        cancel: &CancellationToken,
    ) -> AuthResult<TokenResponse> {
        match &request.grant_type {
            GrantType::AuthorizationCode => self.authorization_code(request, cancel).await,
            GrantType::RefreshToken => self.refresh_token(request, cancel).await,
            GrantType::ClientCredentials => {
                let (access_token, token) = self.access_token(request, None, cancel).await?;
                Ok(self.response(request, access_token, &token))
            }
            GrantType::Password | GrantType::Custom(_) => {
                let subject = required_subject(request)?;
                let (access_token, token) =
                    self.access_token(request, Some(subject), cancel).await?;
                let mut response = self.response(request, access_token, &token);
                response.refresh_token = self
                    .offline_refresh_token(request, subject, &token, cancel)
                    .await?;
                Ok(response)
            }
        }
    }

    async fn authorization_code(
        &self,
        request: &ValidatedTokenRequest,
        cancel: &CancellationToken,
    ) -> AuthResult<TokenResponse> {
        let subject = required_subject(request)?;
        let code = request
            .authorization_code
            .as_ref()
            .ok_or_else(|| AuthError::internal("authorization_code grant without code"))?;

        let (access_token, token) = self.access_token(request, Some(subject), cancel).await?;
        let mut response = self.response(request, access_token, &token);

        if request.scopes.contains_open_id() {
            let creation = TokenCreationRequest {
                nonce: code.nonce(),
                access_token: Some(&response.access_token),
                ..TokenCreationRequest::new(&request.client, request.scopes.scopes())
                    .with_subject(subject)
            };
            let id_token = self.factory.create_identity_token(&creation, cancel).await?;
            response.id_token = Some(self.signing.issue(&id_token, cancel).await?);
        }
        response.refresh_token = self
            .offline_refresh_token(request, subject, &token, cancel)
            .await?;
        Ok(response)
    }

    async fn refresh_token(
        &self,
        request: &ValidatedTokenRequest,
        cancel: &CancellationToken,
    ) -> AuthResult<TokenResponse> {
        let (Some(handle), Some(current)) = (&request.refresh_token_handle, &request.refresh_token)
        else {
            return Err(AuthError::internal("refresh_token grant without refresh token"));
        };
        let client = &request.client;

        let original_scopes = current.scopes();
        let narrowed = request.scopes.names() != original_scopes;
        let (token, recomputed) = if client.update_access_token_claims_on_refresh || narrowed {
            let creation = TokenCreationRequest {
                confirmation: request.confirmation.as_ref(),
                ..TokenCreationRequest::new(client, request.scopes.scopes())
                    .with_subject(&current.subject)
            };
            (self.factory.create_access_token(&creation, cancel).await?, true)
        } else {
            let mut token = current.access_token.clone();
            token.created_at = self.clock.now();
            token.lifetime = client.access_token_lifetime;
            (token, false)
        };

        // Rotate first: a replayed one-time handle must not mint an access token.
        let refresh_token = self
            .refresh
            .update_refresh_token(
                handle,
                current.clone(),
                recomputed.then(|| token.clone()),
                client,
                cancel,
            )
            .await?;
        let access_token = self.signing.issue(&token, cancel).await?;

        let mut response = self.response(request, access_token, &token);
        response.refresh_token = Some(refresh_token);
        Ok(response)
    }

    async fn access_token(
        &self,
        request: &ValidatedTokenRequest,
        subject: Option<&Subject>,
        cancel: &CancellationToken,
    ) -> AuthResult<(String, Token)> {
        let creation = TokenCreationRequest {
            subject,
            confirmation: request.confirmation.as_ref(),
            ..TokenCreationRequest::new(&request.client, request.scopes.scopes())
        };
        let token = self.factory.create_access_token(&creation, cancel).await?;
        let issued = self.signing.issue(&token, cancel).await?;
        Ok((issued, token))
    }

    async fn offline_refresh_token(
        &self,
        request: &ValidatedTokenRequest,
        subject: &Subject,
        token: &Token,
        cancel: &CancellationToken,
    ) -> AuthResult<Option<String>> {
        if !request.scopes.contains_offline_access() {
            return Ok(None);
        }
        let handle = self
            .refresh
            .create_refresh_token(subject, token, &request.client, cancel)
            .await?;
        Ok(Some(handle))
    }

    fn response(&self, request: &ValidatedTokenRequest, access_token: String, token: &Token) -> TokenResponse {
        TokenResponse {
            access_token,
            token_type: if request.confirmation.is_some() { "pop" } else { "Bearer" }.to_string(),
            expires_in: token.lifetime,
            refresh_token: None,
            id_token: None,
        }
    }
}

impl std::fmt::Debug for TokenResponseGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponseGenerator")
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}

fn required_subject(request: &ValidatedTokenRequest) -> AuthResult<&Subject> {
    request
        .subject
        .as_ref()
        .ok_or_else(|| AuthError::internal(format!("{} grant without subject", request.grant_type)))
}
