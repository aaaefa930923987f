//! Token construction and issuance.
//!
//! [`TokenFactory`] assembles the server-side [`Token`] (claims, lifetime,
//! issuer and audience). [`TokenSigningService`] turns it into what the
//! client receives: a compact JWT, or for reference access tokens an opaque
//! handle whose token is kept in the [`TokenHandleStore`].

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::signing::{JwtService, SigningAlgorithm};
use crate::AuthResult;
use crate::cancellation::{cancellable, ensure_active};
use crate::clock::SharedClock;
use crate::config::IdpOptions;
use crate::crypto::generate_handle;
use crate::events::EventService;
use crate::services::ClaimsProvider;
use crate::storage::TokenHandleStore;
use crate::types::{
    AccessTokenType, Claim, Client, ConfirmationKey, Scope, Subject, Token, TokenKind, claim_types,
};

/// Inputs shared by identity and access token creation.
#[derive(Debug, Clone, Copy)]
pub struct TokenCreationRequest<'a> {
    /// `None` for client credentials.
    pub subject: Option<&'a Subject>,
    pub client: &'a Client,
    pub scopes: &'a [Scope],
    pub nonce: Option<&'a str>,
    /// Authorization code issued in the same response, for `c_hash`.
    pub authorization_code: Option<&'a str>,
    /// Access token issued in the same response, for `at_hash`.
    pub access_token: Option<&'a str>,
    /// Put every identity claim into the id_token (no access token issued).
    pub include_all_identity_claims: bool,
    pub confirmation: Option<&'a ConfirmationKey>,
}

impl<'a> TokenCreationRequest<'a> {
    #[must_use]
    pub fn new(client: &'a Client, scopes: &'a [Scope]) -> Self {
        Self {
            subject: None,
            client,
            scopes,
            nonce: None,
            authorization_code: None,
            access_token: None,
            include_all_identity_claims: false,
            confirmation: None,
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: &'a Subject) -> Self {
        self.subject = Some(subject);
        self
    }
}

/// Builds identity and access tokens.
#[derive(Clone)]
pub struct TokenFactory {
    issuer: String,
    access_token_audience: String,
    algorithm: SigningAlgorithm,
    claims: Arc<dyn ClaimsProvider>,
    clock: SharedClock,
}

impl TokenFactory {
    #[must_use]
    pub fn new(
        options: &IdpOptions,
        algorithm: SigningAlgorithm,
        claims: Arc<dyn ClaimsProvider>,
        clock: SharedClock,
    ) -> Self {
        Self {
            issuer: options.issuer().to_string(),
            access_token_audience: options.access_token_audience(),
            algorithm,
            claims,
            clock,
        }
    }

    /// Builds an id_token for `request.subject`, audience the client.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` without a subject and propagates claims
    /// provider failures.
    pub async fn create_identity_token(
        &self,
        request: &TokenCreationRequest<'_>,
        cancel: &CancellationToken,
    ) -> AuthResult<Token> {
        let subject = request
            .subject
            .ok_or_else(|| crate::AuthError::internal("identity token without subject"))?;

        let mut claims = cancellable(
            cancel,
            self.claims.identity_token_claims(
                subject,
                request.client,
                request.scopes,
                request.include_all_identity_claims,
            ),
        )
        .await?;

        if let Some(nonce) = request.nonce {
            claims.push(Claim::new(claim_types::NONCE, nonce));
        }
        if let Some(code) = request.authorization_code {
            claims.push(Claim::new(
                claim_types::AUTHORIZATION_CODE_HASH,
                self.algorithm.left_half_hash(code),
            ));
        }
        if let Some(access_token) = request.access_token {
            claims.push(Claim::new(
                claim_types::ACCESS_TOKEN_HASH,
                self.algorithm.left_half_hash(access_token),
            ));
        }

        Ok(Token {
            kind: TokenKind::IdentityToken,
            issuer: self.issuer.clone(),
            audience: request.client.client_id.clone(),
            client_id: request.client.client_id.clone(),
            created_at: self.clock.now(),
            lifetime: request.client.identity_token_lifetime,
            access_token_type: AccessTokenType::Jwt,
            claims,
            confirmation: None,
        })
    }

    /// Builds an access token for the resources audience.
    ///
    /// # Errors
    ///
    /// Propagates claims provider failures.
    pub async fn create_access_token(
        &self,
        request: &TokenCreationRequest<'_>,
        cancel: &CancellationToken,
    ) -> AuthResult<Token> {
        let mut claims = cancellable(
            cancel,
            self.claims
                .access_token_claims(request.subject, request.client, request.scopes),
        )
        .await?;

        if request.client.include_jwt_id {
            claims.push(Claim::new(
                claim_types::JWT_ID,
                uuid::Uuid::new_v4().simple().to_string(),
            ));
        }

        Ok(Token {
            kind: TokenKind::AccessToken,
            issuer: self.issuer.clone(),
            audience: self.access_token_audience.clone(),
            client_id: request.client.client_id.clone(),
            created_at: self.clock.now(),
            lifetime: request.client.access_token_lifetime,
            access_token_type: request.client.access_token_type,
            claims,
            confirmation: request.confirmation.cloned(),
        })
    }
}

impl std::fmt::Debug for TokenFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenFactory")
            .field("issuer", &self.issuer)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Signing
// =============================================================================

/// Produces the wire form of tokens.
#[derive(Clone)]
pub struct TokenSigningService {
    jwt: Arc<JwtService>,
    handles: Arc<TokenHandleStore>,
    events: EventService,
}

impl TokenSigningService {
    #[must_use]
    pub fn new(jwt: Arc<JwtService>, handles: Arc<TokenHandleStore>, events: EventService) -> Self {
        Self {
            jwt,
            handles,
            events,
        }
    }

    #[must_use]
    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    /// Signs `token` as a compact JWT.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Signing` if encoding fails.
    pub fn sign(&self, token: &Token) -> AuthResult<String> {
        let claims = token.to_claims_object();
        let jwt = self.jwt.encode(&claims)?;

        let identity_token = token.kind == TokenKind::IdentityToken;
        self.events
            .token_issued(identity_token, &token.client_id, move || Value::Object(claims));
        Ok(jwt)
    }

    /// Issues `token` in its client's representation.
    ///
    /// Identity tokens and JWT access tokens are signed. Reference access
    /// tokens are stored under a fresh handle, which is returned.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Signing` or a store failure.
    pub async fn issue(&self, token: &Token, cancel: &CancellationToken) -> AuthResult<String> {
        ensure_active(cancel)?;

        if token.kind == TokenKind::IdentityToken || token.access_token_type == AccessTokenType::Jwt {
            return self.sign(token);
        }

        let handle = generate_handle();
        cancellable(cancel, self.handles.store(&handle, token.clone())).await?;
        tracing::debug!(client_id = %token.client_id, "Reference token stored");

        let claims = token.to_claims_object();
        self.events
            .token_issued(false, &token.client_id, move || Value::Object(claims));
        Ok(handle)
    }
}

impl std::fmt::Debug for TokenSigningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigningService")
            .field("jwt", &self.jwt)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EventsOptions;
    use crate::events::TracingEventSink;
    use crate::services::{AggregateClaimsFilter, DefaultClaimsProvider, InMemoryUser, InMemoryUserService};
    use crate::storage::{HandleStore, InMemoryHandleStore};
    use crate::token::signing::{JwtExpectations, SigningKeyPair};
    use crate::types::StandardScopes;
    use time::macros::datetime;

    struct Fixture {
        factory: TokenFactory,
        signing: TokenSigningService,
        handles: Arc<InMemoryHandleStore<Token>>,
    }

    fn fixture() -> Fixture {
        let clock: SharedClock = Arc::new(ManualClock::new(datetime!(2024-06-01 12:00 UTC)));
        let users = InMemoryUserService::new(
            vec![InMemoryUser::with_password("818727", "alice", "pw").unwrap()],
            clock.clone(),
        );
        let claims = DefaultClaimsProvider::new(Arc::new(users), AggregateClaimsFilter::default());
        let options = IdpOptions {
            issuer_uri: "https://idp.example.com".to_string(),
            ..IdpOptions::default()
        };
        let factory = TokenFactory::new(&options, SigningAlgorithm::RS256, Arc::new(claims), clock.clone());

        let handles = Arc::new(InMemoryHandleStore::new(clock.clone()));
        let jwt = JwtService::new(SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap());
        let events = EventService::new(EventsOptions::default(), Arc::new(TracingEventSink), clock);
        let signing = TokenSigningService::new(Arc::new(jwt), handles.clone(), events);
        Fixture {
            factory,
            signing,
            handles,
        }
    }

    fn client() -> Client {
        Client {
            client_id: "c1".to_string(),
            include_jwt_id: true,
            ..Client::default()
        }
    }

    fn subject() -> Subject {
        Subject::local("818727", "pwd", datetime!(2024-06-01 11:55 UTC))
    }

    #[tokio::test]
    async fn test_access_token_claims_and_jwt() {
        let fx = fixture();
        let cancel = CancellationToken::new();
        let client = client();
        let scopes = vec![StandardScopes::open_id(), Scope::resource("read")];
        let subject = subject();
        let request = TokenCreationRequest::new(&client, &scopes).with_subject(&subject);

        let token = fx.factory.create_access_token(&request, &cancel).await.unwrap();
        assert_eq!(token.audience, "https://idp.example.com/resources");
        assert_eq!(token.lifetime, 3600);
        assert_eq!(token.scopes(), vec!["openid", "read"]);

        let jwt = fx.signing.issue(&token, &cancel).await.unwrap();
        let claims = fx
            .signing
            .jwt()
            .decode(
                &jwt,
                &JwtExpectations::issuer("https://idp.example.com")
                    .with_audience("https://idp.example.com/resources"),
            )
            .unwrap();
        assert_eq!(claims["sub"], "818727");
        assert_eq!(claims["client_id"], "c1");
        assert_eq!(claims["scope"], serde_json::json!(["openid", "read"]));
        assert!(claims["jti"].is_string());
        assert_eq!(
            claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
            3600
        );
    }

    #[tokio::test]
    async fn test_identity_token_hashes_and_nonce() {
        let fx = fixture();
        let cancel = CancellationToken::new();
        let client = client();
        let scopes = vec![StandardScopes::open_id()];
        let subject = subject();
        let mut request = TokenCreationRequest::new(&client, &scopes).with_subject(&subject);
        request.nonce = Some("n-0S6_WzA2Mj");
        request.authorization_code = Some("code-value");
        request.access_token = Some("jHkWEdUXMU1BwAsC4vtUsZwnNvTIxEl0z9K3vx5KF0Y");

        let token = fx.factory.create_identity_token(&request, &cancel).await.unwrap();
        assert_eq!(token.audience, "c1");
        let object = token.to_claims_object();
        assert_eq!(object["nonce"], "n-0S6_WzA2Mj");
        assert_eq!(object["at_hash"], "77QmUPtjPfzWtF2AnpK9RQ");
        assert_eq!(
            object["c_hash"],
            SigningAlgorithm::RS256.left_half_hash("code-value")
        );
        assert_eq!(object["amr"], serde_json::json!(["pwd"]));
    }

    #[tokio::test]
    async fn test_reference_token_is_stored_handle() {
        let fx = fixture();
        let cancel = CancellationToken::new();
        let client = Client {
            access_token_type: AccessTokenType::Reference,
            ..client()
        };
        let scopes = vec![Scope::resource("read")];
        let token = fx
            .factory
            .create_access_token(&TokenCreationRequest::new(&client, &scopes), &cancel)
            .await
            .unwrap();

        let handle = fx.signing.issue(&token, &cancel).await.unwrap();
        assert_eq!(handle.len(), 43);
        assert!(!handle.contains('.'));
        let stored = fx.handles.get(&handle).await.unwrap().unwrap();
        assert_eq!(stored, token);
    }

    #[tokio::test]
    async fn test_confirmation_key_embedded() {
        let fx = fixture();
        let cancel = CancellationToken::new();
        let client = client();
        let scopes = vec![Scope::resource("read")];
        let key = ConfirmationKey {
            kty: "RSA".to_string(),
            n: "0vx7agoebGcQSuu".to_string(),
            e: "AQAB".to_string(),
            alg: Some("RS256".to_string()),
        };
        let mut request = TokenCreationRequest::new(&client, &scopes);
        request.confirmation = Some(&key);

        let token = fx.factory.create_access_token(&request, &cancel).await.unwrap();
        let object = token.to_claims_object();
        assert_eq!(object["cnf"]["jwk"]["kty"], "RSA");
        assert_eq!(object["cnf"]["jwk"]["e"], "AQAB");
    }

    #[tokio::test]
    async fn test_cancelled_issue() {
        let fx = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = client();
        let scopes = vec![Scope::resource("read")];
        let result = fx
            .factory
            .create_access_token(&TokenCreationRequest::new(&client, &scopes), &cancel)
            .await;
        assert!(matches!(result, Err(crate::AuthError::Cancelled)));
    }
}
