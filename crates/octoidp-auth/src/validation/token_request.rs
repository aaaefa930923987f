//! Token endpoint request validation.
//!
//! The client is authenticated first, then the grant is validated:
//!
//! | grant_type           | checks                                                   |
//! |----------------------|----------------------------------------------------------|
//! | `authorization_code` | code consumed atomically, client + redirect_uri binding, PKCE |
//! | `refresh_token`      | handle owned by the client, scopes narrowed only         |
//! | `client_credentials` | scopes allowed for the client, no identity scopes        |
//! | `password`           | credentials checked by the [`UserService`]               |
//! | anything else        | dispatched to the registered [`CustomGrantValidator`](crate::services::CustomGrantValidator) |
//!
//! Every PKCE failure surfaces as the same `invalid_grant`; the specific
//! reason is only logged at debug level.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::client_auth::ClientAuthenticator;
use super::pkce::PkceValidator;
use super::scope::{ScopeValidator, ValidatedScopes, parse_scopes};
use crate::AuthResult;
use crate::cancellation::cancellable;
use crate::clock::SharedClock;
use crate::config::InputLengthRestrictions;
use crate::error::AuthError;
use crate::events::EventService;
use crate::services::{
    AuthenticateResult, CustomGrantRequest, CustomGrantResult, CustomGrantValidators,
    LocalAuthenticationContext, UserService,
};
use crate::storage::{AuthorizationCodeStore, RefreshTokenStore};
use crate::types::{
    AuthorizationCode, Client, ConfirmationKey, GrantType, RefreshToken, RequestParameters,
    Subject,
};

/// Signature algorithms accepted for proof-of-possession keys.
const POP_ALGORITHMS: &[&str] = &["RS256", "RS384", "RS512"];

/// A validated token endpoint request.
#[derive(Debug, Clone)]
pub struct ValidatedTokenRequest {
    pub grant_type: GrantType,
    pub client: Client,
    pub scopes: ValidatedScopes,
    /// Absent for client credentials.
    pub subject: Option<Subject>,
    /// The redeemed code; it is no longer in the store.
    pub authorization_code: Option<AuthorizationCode>,
    pub refresh_token_handle: Option<String>,
    pub refresh_token: Option<RefreshToken>,
    pub username: Option<String>,
    /// Public key of a proof-of-possession request.
    pub confirmation: Option<ConfirmationKey>,
    pub raw: RequestParameters,
}

impl ValidatedTokenRequest {
    fn new(grant_type: GrantType, client: Client, raw: &RequestParameters) -> Self {
        Self {
            grant_type,
            client,
            scopes: ValidatedScopes::default(),
            subject: None,
            authorization_code: None,
            refresh_token_handle: None,
            refresh_token: None,
            username: None,
            confirmation: None,
            raw: raw.clone(),
        }
    }
}

#[derive(Deserialize)]
struct PopKey {
    kty: String,
    n: Option<String>,
    e: Option<String>,
}

/// Validates token endpoint requests.
#[derive(Clone)]
pub struct TokenRequestValidator {
    authenticator: ClientAuthenticator,
    codes: Arc<AuthorizationCodeStore>,
    refresh_tokens: Arc<RefreshTokenStore>,
    scopes: ScopeValidator,
    pkce: PkceValidator,
    users: Arc<dyn UserService>,
    custom_grants: CustomGrantValidators,
    lengths: InputLengthRestrictions,
    events: EventService,
    clock: SharedClock,
}

impl TokenRequestValidator {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        authenticator: ClientAuthenticator,
        codes: Arc<AuthorizationCodeStore>,
        refresh_tokens: Arc<RefreshTokenStore>,
        scopes: ScopeValidator,
        pkce: PkceValidator,
        users: Arc<dyn UserService>,
        custom_grants: CustomGrantValidators,
        lengths: InputLengthRestrictions,
        events: EventService,
        clock: SharedClock,
    ) -> Self {
        Self {
            authenticator,
            codes,
            refresh_tokens,
            scopes,
            pkce,
            users,
            custom_grants,
            lengths,
            events,
            clock,
        }
    }

    /// Authenticates the client and validates the grant.
    ///
    /// `authorization` is the raw `Authorization` header, if any. Failures
    /// raise a token request failure event with the scrubbed parameters.
    ///
    /// # Errors
    ///
    /// Returns the OAuth error of the first failed check.
    pub async fn validate(
        &self,
        authorization: Option<&str>,
        parameters: &RequestParameters,
        cancel: &CancellationToken,
    ) -> AuthResult<ValidatedTokenRequest> {
        match self.validate_inner(authorization, parameters, cancel).await {
            Ok(request) => {
                tracing::debug!(
                    client_id = %request.client.client_id,
                    grant_type = %request.grant_type,
                    "Token request validated"
                );
                Ok(request)
            }
            Err(err) => {
                tracing::warn!(error = err.oauth_error_code(), "Token request rejected: {err}");
                let scrubbed = parameters.to_scrubbed_json();
                self.events
                    .token_request_failure(err.oauth_error_code(), move || scrubbed);
                Err(err)
            }
        }
    }

    async fn validate_inner(
        &self,
        authorization: Option<&str>,
        parameters: &RequestParameters,
        cancel: &CancellationToken,
    ) -> AuthResult<ValidatedTokenRequest> {
        let client = self
            .authenticator
            .authenticate(authorization, parameters, cancel)
            .await?;

        let raw_grant_type = parameters
            .get("grant_type")
            .ok_or_else(|| AuthError::invalid_request("grant_type is missing"))?;
        if raw_grant_type.len() > self.lengths.grant_type {
            return Err(AuthError::invalid_request("grant_type too long"));
        }
        let grant_type = GrantType::parse(raw_grant_type);
        if let GrantType::Custom(name) = &grant_type {
            if !self.custom_grants.contains(name) {
                return Err(AuthError::unsupported_grant_type(name.clone()));
            }
        }
        if !client.is_grant_type_allowed(&grant_type) {
            tracing::warn!(client_id = %client.client_id, grant_type = %grant_type, "Grant type not allowed for client");
            return Err(AuthError::unauthorized_client(format!(
                "Client not authorized for {grant_type}"
            )));
        }

        let mut request = ValidatedTokenRequest::new(grant_type.clone(), client, parameters);
        match grant_type {
            GrantType::AuthorizationCode => {
                self.validate_authorization_code(&mut request, parameters, cancel)
                    .await?;
            }
            GrantType::RefreshToken => {
                self.validate_refresh_token(&mut request, parameters, cancel)
                    .await?;
            }
            GrantType::ClientCredentials => {
                self.validate_client_credentials(&mut request, parameters, cancel)
                    .await?;
            }
            GrantType::Password => {
                self.validate_password(&mut request, parameters, cancel)
                    .await?;
            }
            GrantType::Custom(ref name) => {
                self.validate_custom_grant(name, &mut request, parameters, cancel)
                    .await?;
            }
        }

        request.confirmation = self.proof_of_possession_key(parameters)?;
        Ok(request)
    }

    // =========================================================================
    // Grants
    // =========================================================================

    async fn validate_authorization_code(
        &self,
        request: &mut ValidatedTokenRequest,
        parameters: &RequestParameters,
        cancel: &CancellationToken,
    ) -> AuthResult<()> {
        let handle = parameters
            .get("code")
            .filter(|code| code.len() <= self.lengths.authorization_code)
            .ok_or_else(|| AuthError::invalid_grant("Authorization code is missing or too long"))?;

        // Consumed before any binding check, so a code is never redeemable twice.
        let Some(code) = cancellable(cancel, self.codes.take(handle)).await? else {
            tracing::warn!(client_id = %request.client.client_id, "Unknown or already redeemed authorization code");
            return Err(AuthError::invalid_grant("Invalid authorization code"));
        };
        if code.is_expired(self.clock.now()) {
            return Err(AuthError::invalid_grant("Authorization code expired"));
        }
        if code.client_id() != request.client.client_id {
            tracing::warn!(
                client_id = %request.client.client_id,
                owner = code.client_id(),
                "Authorization code issued to another client"
            );
            return Err(AuthError::invalid_grant("Invalid authorization code"));
        }
        if parameters.get("redirect_uri") != Some(code.redirect_uri()) {
            tracing::warn!(client_id = %request.client.client_id, "redirect_uri does not match authorization request");
            return Err(AuthError::invalid_grant("Invalid redirect_uri"));
        }

        match code.proof_key() {
            Some(challenge) => {
                if let Err(err) = self
                    .pkce
                    .validate_verifier(parameters.get("code_verifier"), challenge)
                {
                    tracing::debug!(client_id = %request.client.client_id, %err, "PKCE verification failed");
                    return Err(AuthError::invalid_grant("Invalid code verifier"));
                }
            }
            None if request.client.requires_pkce() => {
                tracing::debug!(client_id = %request.client.client_id, "No challenge captured for proof-key client");
                return Err(AuthError::invalid_grant("Invalid code verifier"));
            }
            None => {}
        }

        request.scopes = self
            .scopes
            .validate(code.requested_scopes(), &request.client, cancel)
            .await
            .map_err(|err| match err {
                AuthError::InvalidScope { message } => AuthError::invalid_grant(message),
                other => other,
            })?;
        self.ensure_active(&code.subject().subject_id, &request.client, cancel)
            .await?;

        self.events
            .authorization_code_redeemed(&request.client.client_id, &code.subject().subject_id);
        request.subject = Some(code.subject().clone());
        request.authorization_code = Some(code);
        Ok(())
    }

    async fn validate_client_credentials(
        &self,
        request: &mut ValidatedTokenRequest,
        parameters: &RequestParameters,
        cancel: &CancellationToken,
    ) -> AuthResult<()> {
        let scopes = match self.requested_scope_names(parameters)? {
            Some(requested) => {
                let scopes = self.scopes.validate(&requested, &request.client, cancel).await?;
                if scopes.contains_identity_scopes() {
                    return Err(AuthError::invalid_scope(
                        "Client credentials cannot request identity scopes",
                    ));
                }
                scopes
            }
            // identity scopes the client is allowed are not implied here
            None => self
                .scopes
                .client_default_scopes(&request.client, cancel)
                .await?
                .without_identity_scopes(),
        };
        if scopes.is_empty() {
            return Err(AuthError::invalid_scope("No allowed scopes for client"));
        }
        request.scopes = scopes;
        Ok(())
    }

    async fn validate_refresh_token(
        &self,
        request: &mut ValidatedTokenRequest,
        parameters: &RequestParameters,
        cancel: &CancellationToken,
    ) -> AuthResult<()> {
        let handle = parameters
            .get("refresh_token")
            .ok_or_else(|| AuthError::invalid_request("refresh_token is missing"))?;
        if handle.len() > self.lengths.refresh_token {
            return Err(AuthError::invalid_grant("Invalid refresh token"));
        }

        let Some(refresh_token) = cancellable(cancel, self.refresh_tokens.get(handle)).await? else {
            tracing::warn!(client_id = %request.client.client_id, "Unknown refresh token");
            return Err(AuthError::invalid_grant("Invalid refresh token"));
        };
        if refresh_token.is_expired(self.clock.now()) {
            cancellable(cancel, self.refresh_tokens.remove(handle)).await?;
            return Err(AuthError::invalid_grant("Refresh token expired"));
        }
        if refresh_token.client_id() != request.client.client_id {
            tracing::warn!(
                client_id = %request.client.client_id,
                owner = refresh_token.client_id(),
                "Refresh token issued to another client"
            );
            return Err(AuthError::invalid_grant("Invalid refresh token"));
        }

        let granted: Vec<String> = refresh_token
            .scopes()
            .into_iter()
            .map(str::to_string)
            .collect();
        let requested = match self.requested_scope_names(parameters)? {
            Some(requested) => {
                if let Some(extra) = requested.iter().find(|name| !granted.contains(name)) {
                    return Err(AuthError::invalid_scope(format!(
                        "Scope {extra} was not originally granted"
                    )));
                }
                requested
            }
            None => granted,
        };
        request.scopes = self
            .scopes
            .validate(&requested, &request.client, cancel)
            .await?;

        let subject = refresh_token.subject.clone();
        self.ensure_active(&subject.subject_id, &request.client, cancel)
            .await?;

        request.subject = Some(subject);
        request.refresh_token_handle = Some(handle.to_string());
        request.refresh_token = Some(refresh_token);
        Ok(())
    }

    async fn validate_password(
        &self,
        request: &mut ValidatedTokenRequest,
        parameters: &RequestParameters,
        cancel: &CancellationToken,
    ) -> AuthResult<()> {
        let username = parameters
            .get("username")
            .filter(|name| name.len() <= self.lengths.user_name)
            .ok_or_else(|| AuthError::invalid_grant("username is missing or too long"))?;
        let password = parameters
            .get("password")
            .filter(|password| password.len() <= self.lengths.password)
            .ok_or_else(|| AuthError::invalid_grant("password is missing or too long"))?;

        request.scopes = self
            .requested_or_default_scopes(&request.client, parameters, cancel)
            .await?;

        let context = LocalAuthenticationContext {
            username: username.to_string(),
            password: password.to_string(),
            client_id: Some(request.client.client_id.clone()),
        };
        match cancellable(cancel, self.users.authenticate_local(&context)).await? {
            AuthenticateResult::Success(subject) => {
                self.events
                    .local_login_success(username, &subject.subject_id);
                request.subject = Some(subject);
                request.username = Some(username.to_string());
                Ok(())
            }
            AuthenticateResult::Failure { message } => {
                tracing::info!(username, "Resource owner authentication failed");
                self.events.local_login_failure(username, &message);
                Err(AuthError::invalid_grant(message))
            }
        }
    }

    async fn validate_custom_grant(
        &self,
        grant_type: &str,
        request: &mut ValidatedTokenRequest,
        parameters: &RequestParameters,
        cancel: &CancellationToken,
    ) -> AuthResult<()> {
        let validator = self
            .custom_grants
            .get(grant_type)
            .ok_or_else(|| AuthError::unsupported_grant_type(grant_type))?;

        request.scopes = self
            .requested_or_default_scopes(&request.client, parameters, cancel)
            .await?;
        let requested_scopes = request.scopes.names();

        let custom = CustomGrantRequest {
            grant_type,
            client: &request.client,
            parameters,
            requested_scopes: &requested_scopes,
        };
        match cancellable(cancel, validator.validate(&custom)).await? {
            CustomGrantResult::Success(subject) => {
                request.subject = Some(subject);
                Ok(())
            }
            CustomGrantResult::Error { message } => {
                tracing::info!(grant_type, "Custom grant rejected: {message}");
                Err(AuthError::invalid_grant(message))
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn requested_scope_names(&self, parameters: &RequestParameters) -> AuthResult<Option<Vec<String>>> {
        let scope = parameters.get("scope");
        if scope.is_some_and(|scope| scope.len() > self.lengths.scope) {
            return Err(AuthError::invalid_request("scope too long"));
        }
        Ok(parse_scopes(scope))
    }

    async fn requested_or_default_scopes(
        &self,
        client: &Client,
        parameters: &RequestParameters,
        cancel: &CancellationToken,
    ) -> AuthResult<ValidatedScopes> {
        let scopes = match self.requested_scope_names(parameters)? {
            Some(requested) => self.scopes.validate(&requested, client, cancel).await?,
            None => self.scopes.client_default_scopes(client, cancel).await?,
        };
        if scopes.is_empty() {
            return Err(AuthError::invalid_scope("No allowed scopes for client"));
        }
        Ok(scopes)
    }

    async fn ensure_active(
        &self,
        subject_id: &str,
        client: &Client,
        cancel: &CancellationToken,
    ) -> AuthResult<()> {
        if cancellable(cancel, self.users.is_active(subject_id, client)).await? {
            Ok(())
        } else {
            tracing::warn!(sub = subject_id, client_id = %client.client_id, "User is not active");
            Err(AuthError::invalid_grant("User is not active"))
        }
    }

    /// Parses `token_type=pop` with `key` (base64url JSON RSA JWK) and `algorithm`.
    fn proof_of_possession_key(
        &self,
        parameters: &RequestParameters,
    ) -> AuthResult<Option<ConfirmationKey>> {
        match parameters.get("token_type") {
            None | Some("bearer" | "Bearer") => return Ok(None),
            Some("pop") => {}
            Some(other) => {
                return Err(AuthError::invalid_request(format!(
                    "Unsupported token_type: {other}"
                )));
            }
        }

        let algorithm = parameters
            .get("algorithm")
            .filter(|alg| POP_ALGORITHMS.contains(alg))
            .ok_or_else(|| AuthError::invalid_request("Missing or unsupported PoP algorithm"))?;
        let encoded = parameters
            .get("key")
            .filter(|key| key.len() <= self.lengths.jwt)
            .ok_or_else(|| AuthError::invalid_request("Missing PoP key"))?;

        let key: PopKey = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .ok()
            .and_then(|json| serde_json::from_slice(&json).ok())
            .ok_or_else(|| AuthError::invalid_request("Malformed PoP key"))?;
        let (Some(n), Some(e)) = (key.n, key.e) else {
            return Err(AuthError::invalid_request("PoP key must be an RSA key"));
        };
        if key.kty != "RSA" || n.is_empty() || e.is_empty() {
            return Err(AuthError::invalid_request("PoP key must be an RSA key"));
        }

        Ok(Some(ConfirmationKey {
            kty: key.kty,
            n,
            e,
            alg: Some(algorithm.to_string()),
        }))
    }
}

impl std::fmt::Debug for TokenRequestValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRequestValidator")
            .field("custom_grants", &self.custom_grants)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use time::macros::datetime;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{EventsOptions, PkceOptions};
    use crate::crypto::hash_secret;
    use crate::events::TracingEventSink;
    use crate::services::{CustomGrantValidator, InMemoryUser, InMemoryUserService};
    use crate::storage::{HandleStore, InMemoryClientStore, InMemoryHandleStore, InMemoryScopeStore};
    use crate::types::{
        AccessTokenType, Claim, CodeBinding, Flow, Scope, Secret, StandardScopes, Token, TokenKind,
    };
    use crate::validation::pkce::{ProofKeyChallenge, s256_challenge};

    const NOW: time::OffsetDateTime = datetime!(2024-06-01 12:00 UTC);
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const REDIRECT: &str = "https://app.example.com/cb";

    struct Delegation;

    #[async_trait]
    impl CustomGrantValidator for Delegation {
        fn grant_type(&self) -> &str {
            "delegation"
        }

        async fn validate(&self, request: &CustomGrantRequest<'_>) -> AuthResult<CustomGrantResult> {
            Ok(match request.parameters.get("assertion") {
                Some("good") => CustomGrantResult::Success(Subject::local("alice", "delegation", NOW)),
                _ => CustomGrantResult::Error {
                    message: "bad assertion".to_string(),
                },
            })
        }
    }

    struct Fixture {
        codes: Arc<InMemoryHandleStore<AuthorizationCode>>,
        refresh: Arc<InMemoryHandleStore<RefreshToken>>,
        validator: TokenRequestValidator,
    }

    fn client(client_id: &str, flow: Flow) -> Client {
        Client {
            client_id: client_id.to_string(),
            flow,
            client_secrets: vec![Secret::hashed(hash_secret("secret").unwrap())],
            redirect_uris: vec![REDIRECT.to_string()],
            allowed_scopes: ["openid", "offline_access", "read", "write"]
                .map(str::to_string)
                .to_vec(),
            allowed_custom_grant_types: vec!["delegation".to_string()],
            ..Client::default()
        }
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(NOW));
        let clients = InMemoryClientStore::new(vec![
            client("c1", Flow::ClientCredentials),
            client("code", Flow::AuthorizationCode),
            client("pkce", Flow::AuthorizationCodeWithProofKey),
            client("ro", Flow::ResourceOwner),
            client("custom", Flow::Custom),
        ]);
        let mut scopes = StandardScopes::all();
        scopes.extend([Scope::resource("read"), Scope::resource("write"), Scope::resource("admin")]);
        let users = InMemoryUserService::new(
            vec![InMemoryUser::with_password("alice", "alice", "pw").unwrap()],
            clock.clone(),
        );
        let codes = Arc::new(InMemoryHandleStore::new(clock.clone()));
        let refresh = Arc::new(InMemoryHandleStore::new(clock.clone()));
        let mut custom_grants = CustomGrantValidators::new();
        custom_grants.register(Arc::new(Delegation));
        let lengths = InputLengthRestrictions::default();

        let validator = TokenRequestValidator::new(
            ClientAuthenticator::new(Arc::new(clients), lengths.clone(), clock.clone()),
            codes.clone(),
            refresh.clone(),
            ScopeValidator::new(Arc::new(InMemoryScopeStore::new(scopes))),
            PkceValidator::new(PkceOptions::default()),
            Arc::new(users),
            custom_grants,
            lengths,
            EventService::new(EventsOptions::default(), Arc::new(TracingEventSink), clock.clone()),
            clock,
        );
        Fixture {
            codes,
            refresh,
            validator,
        }
    }

    fn params(client_id: &str, pairs: &[(&str, &str)]) -> RequestParameters {
        let mut params = RequestParameters::new()
            .with("client_id", client_id)
            .with("client_secret", "secret");
        for (name, value) in pairs {
            params.insert(*name, *value);
        }
        params
    }

    fn code(client_id: &str, proof_key: Option<ProofKeyChallenge>) -> AuthorizationCode {
        AuthorizationCode::issue(
            CodeBinding {
                client_id: client_id.to_string(),
                subject: Subject::local("alice", "pwd", NOW),
                redirect_uri: REDIRECT.to_string(),
                requested_scopes: vec!["openid".to_string(), "read".to_string()],
                is_open_id: true,
                nonce: None,
                proof_key,
                was_consent_shown: false,
            },
            NOW,
            300,
        )
    }

    fn challenge() -> ProofKeyChallenge {
        PkceValidator::new(PkceOptions::default())
            .validate_challenge(Some(&s256_challenge(VERIFIER)), Some("S256"), true)
            .unwrap()
            .unwrap()
    }

    async fn validate(fx: &Fixture, params: &RequestParameters) -> AuthResult<ValidatedTokenRequest> {
        fx.validator
            .validate(None, params, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_client_credentials_scopes() {
        let fx = fixture();
        let ok = validate(
            &fx,
            &params("c1", &[("grant_type", "client_credentials"), ("scope", "read write")]),
        )
        .await
        .unwrap();
        assert_eq!(ok.scopes.names(), vec!["read", "write"]);
        assert!(ok.subject.is_none());

        let admin = validate(
            &fx,
            &params("c1", &[("grant_type", "client_credentials"), ("scope", "read admin")]),
        )
        .await;
        assert!(matches!(admin, Err(AuthError::InvalidScope { .. })));

        let openid = validate(
            &fx,
            &params("c1", &[("grant_type", "client_credentials"), ("scope", "openid")]),
        )
        .await;
        assert!(matches!(openid, Err(AuthError::InvalidScope { .. })));
    }

    #[tokio::test]
    async fn test_client_credentials_default_scopes_skip_identity() {
        let fx = fixture();
        let defaults = validate(&fx, &params("c1", &[("grant_type", "client_credentials")]))
            .await
            .unwrap();
        assert!(!defaults.scopes.contains_identity_scopes());
        assert!(!defaults.scopes.contains_open_id());
        assert!(defaults.scopes.contains("read"));
        assert!(defaults.scopes.contains("write"));
    }

    #[tokio::test]
    async fn test_client_authentication_and_grant_checks() {
        let fx = fixture();
        let wrong_secret = RequestParameters::new()
            .with("client_id", "c1")
            .with("client_secret", "nope")
            .with("grant_type", "client_credentials");
        assert!(matches!(
            validate(&fx, &wrong_secret).await,
            Err(AuthError::InvalidClient { .. })
        ));

        let not_allowed = params("c1", &[("grant_type", "password"), ("username", "alice"), ("password", "pw")]);
        assert!(matches!(
            validate(&fx, &not_allowed).await,
            Err(AuthError::UnauthorizedClient { .. })
        ));

        let unknown = params("c1", &[("grant_type", "urn:unknown")]);
        assert!(matches!(
            validate(&fx, &unknown).await,
            Err(AuthError::UnsupportedGrantType { .. })
        ));

        let missing = params("c1", &[]);
        assert!(matches!(
            validate(&fx, &missing).await,
            Err(AuthError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_authorization_code_is_consumed_once() {
        let fx = fixture();
        fx.codes.store("abc", code("code", None)).await.unwrap();
        let request = params(
            "code",
            &[("grant_type", "authorization_code"), ("code", "abc"), ("redirect_uri", REDIRECT)],
        );

        let first = validate(&fx, &request).await.unwrap();
        assert_eq!(first.subject.unwrap().subject_id, "alice");
        assert!(first.scopes.contains_open_id());

        for _ in 0..3 {
            assert!(matches!(
                validate(&fx, &request).await,
                Err(AuthError::InvalidGrant { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_concurrent_redemption_succeeds_once() {
        let fx = Arc::new(fixture());
        fx.codes.store("abc", code("code", None)).await.unwrap();
        let request = params(
            "code",
            &[("grant_type", "authorization_code"), ("code", "abc"), ("redirect_uri", REDIRECT)],
        );

        let attempts = (0..8).map(|_| {
            let fx = fx.clone();
            let request = request.clone();
            tokio::spawn(async move { validate(&fx, &request).await.is_ok() })
        });
        let mut successes = 0;
        for attempt in attempts.collect::<Vec<_>>() {
            if attempt.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_code_bindings() {
        let fx = fixture();
        fx.codes.store("other", code("pkce", None)).await.unwrap();
        let wrong_client = params(
            "code",
            &[("grant_type", "authorization_code"), ("code", "other"), ("redirect_uri", REDIRECT)],
        );
        assert!(matches!(
            validate(&fx, &wrong_client).await,
            Err(AuthError::InvalidGrant { .. })
        ));

        fx.codes.store("uri", code("code", None)).await.unwrap();
        let wrong_uri = params(
            "code",
            &[
                ("grant_type", "authorization_code"),
                ("code", "uri"),
                ("redirect_uri", "https://app.example.com/other"),
            ],
        );
        assert!(matches!(
            validate(&fx, &wrong_uri).await,
            Err(AuthError::InvalidGrant { .. })
        ));
    }

    #[tokio::test]
    async fn test_pkce_verifier() {
        let fx = fixture();
        let redeem = |handle: &'static str, verifier: Option<&'static str>| {
            let mut pairs = vec![
                ("grant_type", "authorization_code"),
                ("code", handle),
                ("redirect_uri", REDIRECT),
            ];
            pairs.extend(verifier.map(|v| ("code_verifier", v)));
            params("pkce", &pairs)
        };

        fx.codes.store("good", code("pkce", Some(challenge()))).await.unwrap();
        assert!(validate(&fx, &redeem("good", Some(VERIFIER))).await.is_ok());

        let mutated = "eBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        for (handle, verifier) in [("bad", Some(mutated)), ("short", Some("abc")), ("none", None)] {
            fx.codes.store(handle, code("pkce", Some(challenge()))).await.unwrap();
            let result = validate(&fx, &redeem(handle, verifier)).await;
            assert!(
                matches!(&result, Err(AuthError::InvalidGrant { message }) if message == "Invalid code verifier"),
                "{handle}: {result:?}"
            );
        }

        fx.codes.store("missing", code("pkce", None)).await.unwrap();
        assert!(matches!(
            validate(&fx, &redeem("missing", Some(VERIFIER))).await,
            Err(AuthError::InvalidGrant { .. })
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_scope_narrowing() {
        let fx = fixture();
        let access_token = Token {
            kind: TokenKind::AccessToken,
            issuer: "https://idp.example.com".to_string(),
            audience: "https://idp.example.com/resources".to_string(),
            client_id: "code".to_string(),
            created_at: NOW,
            lifetime: 3600,
            access_token_type: AccessTokenType::Jwt,
            claims: vec![
                Claim::new("sub", "alice"),
                Claim::new("scope", "read"),
                Claim::new("scope", "offline_access"),
            ],
            confirmation: None,
        };
        fx.refresh
            .store(
                "rt",
                RefreshToken {
                    access_token,
                    subject: Subject::local("alice", "pwd", NOW),
                    created_at: NOW,
                    lifetime: 86_400,
                    version: 1,
                },
            )
            .await
            .unwrap();

        let all = validate(&fx, &params("code", &[("grant_type", "refresh_token"), ("refresh_token", "rt")]))
            .await
            .unwrap();
        assert_eq!(all.scopes.names(), vec!["read", "offline_access"]);
        assert_eq!(all.refresh_token_handle.as_deref(), Some("rt"));

        let narrowed = validate(
            &fx,
            &params("code", &[("grant_type", "refresh_token"), ("refresh_token", "rt"), ("scope", "read")]),
        )
        .await
        .unwrap();
        assert_eq!(narrowed.scopes.names(), vec!["read"]);

        let widened = validate(
            &fx,
            &params("code", &[("grant_type", "refresh_token"), ("refresh_token", "rt"), ("scope", "read write")]),
        )
        .await;
        assert!(matches!(widened, Err(AuthError::InvalidScope { .. })));

        let unknown = validate(&fx, &params("code", &[("grant_type", "refresh_token"), ("refresh_token", "zz")])).await;
        assert!(matches!(unknown, Err(AuthError::InvalidGrant { .. })));
    }

    #[tokio::test]
    async fn test_password_grant() {
        let fx = fixture();
        let ok = validate(
            &fx,
            &params("ro", &[("grant_type", "password"), ("username", "alice"), ("password", "pw"), ("scope", "read")]),
        )
        .await
        .unwrap();
        assert_eq!(ok.subject.unwrap().subject_id, "alice");
        assert_eq!(ok.username.as_deref(), Some("alice"));

        let bad = validate(
            &fx,
            &params("ro", &[("grant_type", "password"), ("username", "alice"), ("password", "nope")]),
        )
        .await;
        assert!(matches!(bad, Err(AuthError::InvalidGrant { .. })));
    }

    #[tokio::test]
    async fn test_custom_grant() {
        let fx = fixture();
        let ok = validate(
            &fx,
            &params("custom", &[("grant_type", "delegation"), ("assertion", "good"), ("scope", "read")]),
        )
        .await
        .unwrap();
        assert_eq!(ok.grant_type, GrantType::Custom("delegation".to_string()));
        assert_eq!(ok.subject.unwrap().subject_id, "alice");

        let bad = validate(&fx, &params("custom", &[("grant_type", "delegation"), ("assertion", "bad")])).await;
        assert!(matches!(bad, Err(AuthError::InvalidGrant { message }) if message == "bad assertion"));
    }

    #[tokio::test]
    async fn test_proof_of_possession_key() {
        let fx = fixture();
        let key = URL_SAFE_NO_PAD.encode(r#"{"kty":"RSA","n":"0vx7agoebGc","e":"AQAB"}"#);
        let pop = validate(
            &fx,
            &params(
                "c1",
                &[
                    ("grant_type", "client_credentials"),
                    ("scope", "read"),
                    ("token_type", "pop"),
                    ("algorithm", "RS256"),
                    ("key", key.as_str()),
                ],
            ),
        )
        .await
        .unwrap();
        let confirmation = pop.confirmation.unwrap();
        assert_eq!(confirmation.n, "0vx7agoebGc");
        assert_eq!(confirmation.alg.as_deref(), Some("RS256"));

        let garbage = validate(
            &fx,
            &params(
                "c1",
                &[
                    ("grant_type", "client_credentials"),
                    ("token_type", "pop"),
                    ("algorithm", "RS256"),
                    ("key", "not-a-key"),
                ],
            ),
        )
        .await;
        assert!(matches!(garbage, Err(AuthError::InvalidRequest { .. })));
    }
}
