//! Client registrations.

use serde::{Deserialize, Serialize};

use super::claims::Claim;
use super::secret::Secret;

// =============================================================================
// Flow
// =============================================================================

/// The protocol flow a client is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    AuthorizationCode,
    Implicit,
    Hybrid,
    ClientCredentials,
    ResourceOwner,
    Custom,
    AuthorizationCodeWithProofKey,
    HybridWithProofKey,
}

impl Flow {
    /// Returns `true` for the flows that must present a PKCE challenge.
    #[must_use]
    pub fn requires_proof_key(self) -> bool {
        matches!(
            self,
            Self::AuthorizationCodeWithProofKey | Self::HybridWithProofKey
        )
    }

    /// Ignores the proof-key distinction.
    #[must_use]
    pub fn base(self) -> Self {
        match self {
            Self::AuthorizationCodeWithProofKey => Self::AuthorizationCode,
            Self::HybridWithProofKey => Self::Hybrid,
            other => other,
        }
    }

    /// Flows that redeem authorization codes at the token endpoint.
    #[must_use]
    pub fn redeems_codes(self) -> bool {
        matches!(self.base(), Self::AuthorizationCode | Self::Hybrid)
    }
}

// =============================================================================
// Grant Type
// =============================================================================

/// The `grant_type` of a token request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
    Password,
    RefreshToken,
    /// An extension grant dispatched to a custom grant validator.
    Custom(String),
}

impl GrantType {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "authorization_code" => Self::AuthorizationCode,
            "client_credentials" => Self::ClientCredentials,
            "password" => Self::Password,
            "refresh_token" => Self::RefreshToken,
            other => Self::Custom(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::Password => "password",
            Self::RefreshToken => "refresh_token",
            Self::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Token settings
// =============================================================================

/// How access tokens of a client are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTokenType {
    /// Self-contained signed JWT.
    #[default]
    Jwt,
    /// Opaque handle resolved through the token handle store.
    Reference,
}

/// Whether a refresh token handle survives its own redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenUsage {
    /// A new handle is issued on every refresh.
    #[default]
    OneTimeOnly,
    /// The same handle is returned again.
    ReUse,
}

/// How refresh token lifetimes are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenExpiration {
    /// Fixed lifetime from the first issuance.
    #[default]
    Absolute,
    /// Every refresh extends the lifetime, capped by the absolute lifetime.
    Sliding,
}

// =============================================================================
// Client
// =============================================================================

/// A registered client. Immutable for the duration of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Client {
    pub client_id: String,
    pub client_name: String,
    pub enabled: bool,

    pub client_secrets: Vec<Secret>,

    /// When `false` the client authenticates with its id alone.
    pub require_client_secret: bool,

    pub flow: Flow,

    /// Extension grant types usable with [`Flow::Custom`].
    pub allowed_custom_grant_types: Vec<String>,

    /// Registered redirect URIs, compared by exact string match.
    pub redirect_uris: Vec<String>,

    pub allowed_scopes: Vec<String>,
    pub allow_access_to_all_scopes: bool,

    pub require_consent: bool,
    pub allow_remember_consent: bool,

    /// Allows implicit and hybrid responses that carry an access token.
    pub allow_access_tokens_via_browser: bool,

    pub access_token_type: AccessTokenType,

    /// Lifetimes, in seconds.
    pub identity_token_lifetime: u64,
    pub access_token_lifetime: u64,
    pub authorization_code_lifetime: u64,
    pub absolute_refresh_token_lifetime: u64,
    pub sliding_refresh_token_lifetime: u64,

    pub refresh_token_usage: TokenUsage,
    pub refresh_token_expiration: TokenExpiration,
    pub update_access_token_claims_on_refresh: bool,

    /// Claims added to every access token of this client.
    pub claims: Vec<Claim>,
    pub always_send_client_claims: bool,
    pub prefix_client_claims: bool,

    pub include_jwt_id: bool,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_name: String::new(),
            enabled: true,
            client_secrets: Vec::new(),
            require_client_secret: true,
            flow: Flow::Implicit,
            allowed_custom_grant_types: Vec::new(),
            redirect_uris: Vec::new(),
            allowed_scopes: Vec::new(),
            allow_access_to_all_scopes: false,
            require_consent: true,
            allow_remember_consent: true,
            allow_access_tokens_via_browser: true,
            access_token_type: AccessTokenType::Jwt,
            identity_token_lifetime: 300,
            access_token_lifetime: 3600,
            authorization_code_lifetime: 300,
            absolute_refresh_token_lifetime: 2_592_000,
            sliding_refresh_token_lifetime: 1_296_000,
            refresh_token_usage: TokenUsage::OneTimeOnly,
            refresh_token_expiration: TokenExpiration::Absolute,
            update_access_token_claims_on_refresh: false,
            claims: Vec::new(),
            always_send_client_claims: false,
            prefix_client_claims: true,
            include_jwt_id: false,
        }
    }
}

impl Client {
    /// Validates the registration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ClientValidationError> {
        if self.client_id.is_empty() {
            return Err(ClientValidationError::EmptyClientId);
        }
        let uses_browser = matches!(
            self.flow.base(),
            Flow::AuthorizationCode | Flow::Implicit | Flow::Hybrid
        );
        if uses_browser && self.redirect_uris.is_empty() {
            return Err(ClientValidationError::NoRedirectUris);
        }
        if self.require_client_secret
            && self.client_secrets.is_empty()
            && !matches!(self.flow, Flow::Implicit)
        {
            return Err(ClientValidationError::MissingSecret);
        }
        if self.flow == Flow::Custom && self.allowed_custom_grant_types.is_empty() {
            return Err(ClientValidationError::NoCustomGrantTypes);
        }
        Ok(())
    }

    /// Exact string comparison against the registered redirect URIs.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|allowed| allowed == uri)
    }

    #[must_use]
    pub fn is_scope_allowed(&self, scope: &str) -> bool {
        self.allow_access_to_all_scopes || self.allowed_scopes.iter().any(|s| s == scope)
    }

    /// Returns `true` if the client's flow may use `grant_type` at the token endpoint.
    #[must_use]
    pub fn is_grant_type_allowed(&self, grant_type: &GrantType) -> bool {
        match grant_type {
            GrantType::AuthorizationCode => self.flow.redeems_codes(),
            GrantType::ClientCredentials => self.flow == Flow::ClientCredentials,
            GrantType::Password => self.flow == Flow::ResourceOwner,
            GrantType::RefreshToken => {
                self.flow.redeems_codes() || matches!(self.flow, Flow::ResourceOwner | Flow::Custom)
            }
            GrantType::Custom(name) => {
                self.flow == Flow::Custom && self.allowed_custom_grant_types.iter().any(|g| g == name)
            }
        }
    }

    #[must_use]
    pub fn requires_pkce(&self) -> bool {
        self.flow.requires_proof_key()
    }
}

/// Client registration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientValidationError {
    #[error("client_id cannot be empty")]
    EmptyClientId,

    #[error("browser based flows require at least one redirect URI")]
    NoRedirectUris,

    #[error("client requires a secret but none is registered")]
    MissingSecret,

    #[error("custom flow requires at least one allowed custom grant type")]
    NoCustomGrantTypes,
}
