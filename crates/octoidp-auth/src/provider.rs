//! Wiring of the protocol engine.
//!
//! [`IdentityProviderBuilder`] takes the host's stores and collaborators,
//! fills the gaps with in-memory defaults, applies the caching decorators and
//! assembles every validator and generator around one [`IdpOptions`].
//!
//! ```
//! use octoidp_auth::provider::IdentityProviderBuilder;
//! use octoidp_auth::config::IdpOptions;
//!
//! let provider = IdentityProviderBuilder::new(IdpOptions::default())
//!     .build()
//!     .unwrap();
//! assert_eq!(provider.options.issuer(), "http://localhost:5000");
//! ```

use std::sync::Arc;

use crate::AuthResult;
use crate::clock::{SharedClock, SystemClock};
use crate::config::IdpOptions;
use crate::error::AuthError;
use crate::events::{EventService, EventSink, TracingEventSink};
use crate::grants::{
    AuthorizeInteraction, AuthorizeResponseGenerator, TokenResponseGenerator,
    UserInfoResponseGenerator,
};
use crate::services::{
    AggregateClaimsFilter, CachingUserService, ClaimsProvider, ConsentService,
    CustomGrantValidator, CustomGrantValidators, DefaultClaimsProvider, InMemoryUserService,
    UserService,
};
use crate::storage::{
    AuthorizationCodeStore, CachingClientStore, CachingScopeStore, ClientStore, ConsentStore,
    InMemoryClientStore, InMemoryConsentStore, InMemoryHandleStore, InMemoryScopeStore,
    RefreshTokenStore, ScopeStore, TokenHandleStore,
};
use crate::token::{
    IntrospectionService, JwtService, RefreshTokenService, RevocationService, SigningKeyPair,
    TokenFactory, TokenSigningService, TokenValidator,
};
use crate::types::StandardScopes;
use crate::validation::{
    AuthorizeRequestValidator, ClientAuthenticator, PkceValidator, ScopeSecretValidator,
    ScopeValidator, TokenRequestValidator,
};

// =============================================================================
// Provider
// =============================================================================

/// The assembled identity provider.
///
/// Cheap to clone; every component is reference counted.
#[derive(Clone)]
pub struct IdentityProvider {
    pub options: Arc<IdpOptions>,
    pub clock: SharedClock,
    pub events: EventService,
    pub jwt: Arc<JwtService>,

    pub clients: Arc<dyn ClientStore>,
    pub scopes: Arc<dyn ScopeStore>,
    pub users: Arc<dyn UserService>,

    pub authorize_validator: AuthorizeRequestValidator,
    pub interaction: AuthorizeInteraction,
    pub authorize_responses: AuthorizeResponseGenerator,

    pub client_authenticator: ClientAuthenticator,
    pub scope_secrets: ScopeSecretValidator,
    pub token_request_validator: TokenRequestValidator,
    pub token_responses: TokenResponseGenerator,

    pub token_validator: TokenValidator,
    pub introspection: IntrospectionService,
    pub revocation: RevocationService,
    pub userinfo: UserInfoResponseGenerator,

    /// Grant types with a registered validator, for discovery.
    pub custom_grant_types: Vec<String>,
}

impl IdentityProvider {
    #[must_use]
    pub fn builder(options: IdpOptions) -> IdentityProviderBuilder {
        IdentityProviderBuilder::new(options)
    }
}

impl std::fmt::Debug for IdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProvider")
            .field("issuer", &self.options.issuer())
            .field("kid", &self.jwt.current_kid())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builds an [`IdentityProvider`].
///
/// Anything not supplied defaults to an in-memory implementation: no
/// clients, the standard OpenID Connect scopes, no users, and a freshly
/// generated signing key of the configured algorithm.
pub struct IdentityProviderBuilder {
    options: IdpOptions,
    clock: Option<SharedClock>,
    event_sink: Option<Arc<dyn EventSink>>,
    clients: Option<Arc<dyn ClientStore>>,
    scopes: Option<Arc<dyn ScopeStore>>,
    users: Option<Arc<dyn UserService>>,
    consents: Option<Arc<dyn ConsentStore>>,
    authorization_codes: Option<Arc<AuthorizationCodeStore>>,
    token_handles: Option<Arc<TokenHandleStore>>,
    refresh_tokens: Option<Arc<RefreshTokenStore>>,
    signing_key: Option<SigningKeyPair>,
    validation_keys: Vec<SigningKeyPair>,
    claims_filter: AggregateClaimsFilter,
    claims_provider: Option<Arc<dyn ClaimsProvider>>,
    custom_grants: CustomGrantValidators,
}

impl IdentityProviderBuilder {
    #[must_use]
    pub fn new(options: IdpOptions) -> Self {
        Self {
            options,
            clock: None,
            event_sink: None,
            clients: None,
            scopes: None,
            users: None,
            consents: None,
            authorization_codes: None,
            token_handles: None,
            refresh_tokens: None,
            signing_key: None,
            validation_keys: Vec::new(),
            claims_filter: AggregateClaimsFilter::default(),
            claims_provider: None,
            custom_grants: CustomGrantValidators::new(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn with_client_store(mut self, clients: Arc<dyn ClientStore>) -> Self {
        self.clients = Some(clients);
        self
    }

    #[must_use]
    pub fn with_scope_store(mut self, scopes: Arc<dyn ScopeStore>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    #[must_use]
    pub fn with_user_service(mut self, users: Arc<dyn UserService>) -> Self {
        self.users = Some(users);
        self
    }

    #[must_use]
    pub fn with_consent_store(mut self, consents: Arc<dyn ConsentStore>) -> Self {
        self.consents = Some(consents);
        self
    }

    #[must_use]
    pub fn with_authorization_code_store(mut self, store: Arc<AuthorizationCodeStore>) -> Self {
        self.authorization_codes = Some(store);
        self
    }

    #[must_use]
    pub fn with_token_handle_store(mut self, store: Arc<TokenHandleStore>) -> Self {
        self.token_handles = Some(store);
        self
    }

    #[must_use]
    pub fn with_refresh_token_store(mut self, store: Arc<RefreshTokenStore>) -> Self {
        self.refresh_tokens = Some(store);
        self
    }

    /// Signs with `key` instead of a generated one.
    #[must_use]
    pub fn with_signing_key(mut self, key: SigningKeyPair) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// Also accepts and publishes `key`, e.g. the previous key after rollover.
    #[must_use]
    pub fn with_validation_key(mut self, key: SigningKeyPair) -> Self {
        self.validation_keys.push(key);
        self
    }

    /// Filters profile claims before they are issued.
    #[must_use]
    pub fn with_claims_filter(mut self, filter: AggregateClaimsFilter) -> Self {
        self.claims_filter = filter;
        self
    }

    /// Replaces the [`DefaultClaimsProvider`].
    #[must_use]
    pub fn with_claims_provider(mut self, provider: Arc<dyn ClaimsProvider>) -> Self {
        self.claims_provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_custom_grant(mut self, validator: Arc<dyn CustomGrantValidator>) -> Self {
        self.custom_grants.register(validator);
        self
    }

    /// # Errors
    ///
    /// Returns `AuthError::Configuration` for invalid options and
    /// `AuthError::Signing` if no key was given and generation fails.
    pub fn build(self) -> AuthResult<IdentityProvider> {
        self.options
            .validate()
            .map_err(|err| AuthError::configuration(err.to_string()))?;

        let options = Arc::new(self.options);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let events = EventService::new(
            options.events.clone(),
            self.event_sink.unwrap_or_else(|| Arc::new(TracingEventSink)),
            clock.clone(),
        );

        let signing_key = match self.signing_key {
            Some(key) => key,
            None => generate_key(&options)?,
        };
        let algorithm = signing_key.algorithm;
        let jwt = Arc::new(
            self.validation_keys
                .into_iter()
                .fold(JwtService::new(signing_key), JwtService::with_validation_key),
        );

        let mut clients = self
            .clients
            .unwrap_or_else(|| Arc::new(InMemoryClientStore::new(Vec::new())));
        let mut scopes = self
            .scopes
            .unwrap_or_else(|| Arc::new(InMemoryScopeStore::new(StandardScopes::all())));
        let mut users = self
            .users
            .unwrap_or_else(|| Arc::new(InMemoryUserService::new(Vec::new(), clock.clone())));
        if options.caching.enabled {
            clients = Arc::new(CachingClientStore::new(clients, &options.caching));
            scopes = Arc::new(CachingScopeStore::new(scopes, &options.caching));
            users = Arc::new(CachingUserService::new(users, &options.caching));
        }

        let consents = self
            .consents
            .unwrap_or_else(|| Arc::new(InMemoryConsentStore::new()));
        let codes: Arc<AuthorizationCodeStore> = self
            .authorization_codes
            .unwrap_or_else(|| Arc::new(InMemoryHandleStore::new(clock.clone())));
        let token_handles: Arc<TokenHandleStore> = self
            .token_handles
            .unwrap_or_else(|| Arc::new(InMemoryHandleStore::new(clock.clone())));
        let refresh_tokens: Arc<RefreshTokenStore> = self
            .refresh_tokens
            .unwrap_or_else(|| Arc::new(InMemoryHandleStore::new(clock.clone())));

        let claims_provider = self.claims_provider.unwrap_or_else(|| {
            Arc::new(DefaultClaimsProvider::new(
                users.clone(),
                self.claims_filter.clone(),
            ))
        });

        let scope_validator = ScopeValidator::new(scopes.clone());
        let pkce = PkceValidator::new(options.pkce.clone());
        let factory = TokenFactory::new(&options, algorithm, claims_provider, clock.clone());
        let signing = TokenSigningService::new(jwt.clone(), token_handles.clone(), events.clone());
        let refresh = RefreshTokenService::new(refresh_tokens.clone(), events.clone(), clock.clone());
        let client_authenticator =
            ClientAuthenticator::new(clients.clone(), options.input_lengths.clone(), clock.clone());
        let custom_grant_types = self.custom_grants.grant_types();

        let token_validator = TokenValidator::new(
            &options,
            jwt.clone(),
            token_handles.clone(),
            clients.clone(),
            users.clone(),
            clock.clone(),
        );

        let provider = IdentityProvider {
            authorize_validator: AuthorizeRequestValidator::new(
                clients.clone(),
                scope_validator.clone(),
                pkce.clone(),
                options.input_lengths.clone(),
                events.clone(),
            ),
            interaction: AuthorizeInteraction::new(
                options.authentication.clone(),
                ConsentService::new(consents),
                clock.clone(),
            ),
            authorize_responses: AuthorizeResponseGenerator::new(
                codes.clone(),
                factory.clone(),
                signing.clone(),
                events.clone(),
                clock.clone(),
            ),
            scope_secrets: ScopeSecretValidator::new(
                scopes.clone(),
                options.input_lengths.clone(),
                clock.clone(),
            ),
            token_request_validator: TokenRequestValidator::new(
                client_authenticator.clone(),
                codes,
                refresh_tokens.clone(),
                scope_validator,
                pkce,
                users.clone(),
                self.custom_grants,
                options.input_lengths.clone(),
                events.clone(),
                clock.clone(),
            ),
            token_responses: TokenResponseGenerator::new(factory, signing, refresh, clock.clone()),
            introspection: IntrospectionService::new(token_validator.clone()),
            revocation: RevocationService::new(token_handles, refresh_tokens, events.clone()),
            userinfo: UserInfoResponseGenerator::new(
                scopes.clone(),
                users.clone(),
                self.claims_filter,
            ),
            client_authenticator,
            token_validator,
            custom_grant_types,
            options,
            clock,
            events,
            jwt,
            clients,
            scopes,
            users,
        };

        tracing::info!(
            issuer = %provider.options.issuer(),
            algorithm = %algorithm.as_str(),
            kid = %provider.jwt.current_kid(),
            caching = provider.options.caching.enabled,
            "Identity provider assembled"
        );
        Ok(provider)
    }
}

fn generate_key(options: &IdpOptions) -> AuthResult<SigningKeyPair> {
    let algorithm = options.signing.algorithm;
    let mut key = if algorithm.is_ec() {
        SigningKeyPair::generate_ec()?
    } else {
        SigningKeyPair::generate_rsa(algorithm)?
    };
    if let Some(kid) = &options.signing.key_id {
        key.kid = kid.clone();
    }
    tracing::warn!(kid = %key.kid, "No signing key configured, generated an ephemeral key");
    Ok(key)
}

impl std::fmt::Debug for IdentityProviderBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProviderBuilder")
            .field("issuer", &self.options.issuer())
            .field("custom_grants", &self.custom_grants.grant_types())
            .finish_non_exhaustive()
    }
}
