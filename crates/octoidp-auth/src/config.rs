//! Identity provider configuration.
//!
//! All option structs deserialize with `#[serde(default)]`, so a partial TOML
//! document only needs the values it wants to change.
//!
//! # Example (TOML)
//!
//! ```toml
//! [idp]
//! issuer_uri = "https://idp.example.com"
//!
//! [idp.input_lengths]
//! scope = 500
//!
//! [idp.pkce]
//! code_verifier_min_length = 43
//!
//! [idp.caching]
//! ttl = "5m"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::token::signing::SigningAlgorithm;

/// Root options of the identity provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdpOptions {
    /// Value of the `iss` claim and base of every absolute endpoint URL.
    pub issuer_uri: String,

    /// Display name used on rendered pages.
    pub site_name: String,

    /// Public base URL the endpoints are reachable under.
    /// Defaults to `issuer_uri` when empty.
    pub public_origin: String,

    /// Token signing keys.
    pub signing: SigningOptions,

    /// Upper bounds for inbound protocol parameters.
    pub input_lengths: InputLengthRestrictions,

    /// PKCE length bounds and messages.
    pub pkce: PkceOptions,

    /// Caching of store lookups and validated JWTs.
    pub caching: CachingOptions,

    /// Which events reach the event sink.
    pub events: EventsOptions,

    /// Endpoint switches.
    pub endpoints: EndpointOptions,

    /// Where the host's login and consent pages live.
    pub authentication: AuthenticationOptions,

    /// Allowed clock skew when checking `exp`/`nbf` of JWTs.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
}

impl Default for IdpOptions {
    fn default() -> Self {
        Self {
            issuer_uri: "http://localhost:5000".to_string(),
            site_name: "OctoIdP".to_string(),
            public_origin: String::new(),
            signing: SigningOptions::default(),
            input_lengths: InputLengthRestrictions::default(),
            pkce: PkceOptions::default(),
            caching: CachingOptions::default(),
            events: EventsOptions::default(),
            endpoints: EndpointOptions::default(),
            authentication: AuthenticationOptions::default(),
            clock_skew: Duration::ZERO,
        }
    }
}

impl IdpOptions {
    /// The issuer without a trailing slash.
    #[must_use]
    pub fn issuer(&self) -> &str {
        self.issuer_uri.trim_end_matches('/')
    }

    /// Base URL for endpoint links, without a trailing slash.
    #[must_use]
    pub fn origin(&self) -> &str {
        if self.public_origin.is_empty() {
            self.issuer()
        } else {
            self.public_origin.trim_end_matches('/')
        }
    }

    /// Audience stamped on access tokens.
    #[must_use]
    pub fn access_token_audience(&self) -> String {
        format!("{}/resources", self.issuer())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistent value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer_uri.is_empty() {
            return Err(ConfigError::Missing("issuer_uri".to_string()));
        }
        if url::Url::parse(&self.issuer_uri).is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "issuer_uri '{}' is not an absolute URL",
                self.issuer_uri
            )));
        }

        let pkce = &self.pkce;
        if pkce.code_challenge_min_length == 0
            || pkce.code_challenge_min_length > pkce.code_challenge_max_length
        {
            return Err(ConfigError::InvalidValue(
                "pkce.code_challenge_min_length must be > 0 and <= code_challenge_max_length"
                    .to_string(),
            ));
        }
        if pkce.code_verifier_min_length == 0
            || pkce.code_verifier_min_length > pkce.code_verifier_max_length
        {
            return Err(ConfigError::InvalidValue(
                "pkce.code_verifier_min_length must be > 0 and <= code_verifier_max_length"
                    .to_string(),
            ));
        }

        if self.caching.enabled && self.caching.max_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "caching.max_capacity must be > 0 when caching is enabled".to_string(),
            ));
        }

        if self.signing.private_key_path.is_some() != self.signing.public_key_path.is_some() {
            return Err(ConfigError::InvalidValue(
                "signing.private_key_path and signing.public_key_path must be set together"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Token signing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningOptions {
    /// JWS algorithm of the active key.
    pub algorithm: SigningAlgorithm,

    /// Key id published in the JWKS. Generated when unset.
    pub key_id: Option<String>,

    /// PEM private key. PKCS#8 for RSA, PKCS#8 or SEC1 for EC.
    pub private_key_path: Option<PathBuf>,

    /// PEM public key. Only read for RSA.
    pub public_key_path: Option<PathBuf>,
}

impl Default for SigningOptions {
    fn default() -> Self {
        Self {
            algorithm: SigningAlgorithm::RS256,
            key_id: None,
            private_key_path: None,
            public_key_path: None,
        }
    }
}

/// Maximum accepted lengths of inbound parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InputLengthRestrictions {
    pub client_id: usize,
    pub client_secret: usize,
    pub scope: usize,
    pub redirect_uri: usize,
    pub nonce: usize,
    pub ui_locale: usize,
    pub login_hint: usize,
    pub acr_values: usize,
    pub grant_type: usize,
    pub user_name: usize,
    pub password: usize,
    pub state: usize,
    pub authorization_code: usize,
    pub refresh_token: usize,
    pub token_handle: usize,
    pub jwt: usize,
}

impl Default for InputLengthRestrictions {
    fn default() -> Self {
        Self {
            client_id: 100,
            client_secret: 100,
            scope: 300,
            redirect_uri: 400,
            nonce: 300,
            ui_locale: 100,
            login_hint: 100,
            acr_values: 300,
            grant_type: 100,
            user_name: 100,
            password: 100,
            state: 2000,
            authorization_code: 100,
            refresh_token: 100,
            token_handle: 100,
            jwt: 51_200,
        }
    }
}

/// PKCE length bounds and error texts.
///
/// These values are part of the interoperability contract with conformance
/// suites, so they are configuration rather than constants.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PkceOptions {
    pub code_challenge_min_length: usize,
    pub code_challenge_max_length: usize,
    pub code_verifier_min_length: usize,
    pub code_verifier_max_length: usize,

    /// Description sent when a proof-key client omits `code_challenge`.
    pub missing_challenge_message: String,

    /// Description sent when `code_challenge` violates the length bounds.
    pub challenge_length_message: String,

    /// Description sent for an unknown `code_challenge_method`.
    pub unsupported_method_message: String,
}

impl Default for PkceOptions {
    fn default() -> Self {
        Self {
            code_challenge_min_length: 43,
            code_challenge_max_length: 128,
            code_verifier_min_length: 43,
            code_verifier_max_length: 128,
            missing_challenge_message: "code challenge required".to_string(),
            challenge_length_message: "code_challenge is either too short or too long"
                .to_string(),
            unsupported_method_message: "transform algorithm not supported".to_string(),
        }
    }
}

/// Caching of store lookups.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CachingOptions {
    /// Wrap client, scope and user lookups in caching decorators.
    pub enabled: bool,

    /// Maximum number of entries per cache.
    pub max_capacity: u64,

    /// Time to live of cached lookups.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Time to live of verified JWT claim sets.
    #[serde(with = "humantime_serde")]
    pub validated_jwt_ttl: Duration,
}

impl Default for CachingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: 10_000,
            ttl: Duration::from_secs(300),
            validated_jwt_ttl: Duration::from_secs(60),
        }
    }
}

/// Event filtering.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsOptions {
    pub raise_success_events: bool,
    pub raise_failure_events: bool,
    pub raise_information_events: bool,
    pub raise_error_events: bool,
}

impl Default for EventsOptions {
    fn default() -> Self {
        Self {
            raise_success_events: true,
            raise_failure_events: true,
            raise_information_events: false,
            raise_error_events: true,
        }
    }
}

/// Endpoint switches. Disabled endpoints are not routed.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointOptions {
    pub enable_authorize_endpoint: bool,
    pub enable_token_endpoint: bool,
    pub enable_userinfo_endpoint: bool,
    pub enable_discovery_endpoint: bool,
    pub enable_introspection_endpoint: bool,
    pub enable_token_revocation_endpoint: bool,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            enable_authorize_endpoint: true,
            enable_token_endpoint: true,
            enable_userinfo_endpoint: true,
            enable_discovery_endpoint: true,
            enable_introspection_endpoint: true,
            enable_token_revocation_endpoint: true,
        }
    }
}

/// Integration points with the host's login and consent UI.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthenticationOptions {
    /// Login page, receives the original authorize URL as `returnUrl`.
    pub login_url: String,

    /// Consent page, receives the original authorize URL as `returnUrl`.
    pub consent_url: String,
}

impl Default for AuthenticationOptions {
    fn default() -> Self {
        Self {
            login_url: "/login".to_string(),
            consent_url: "/consent".to_string(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range or inconsistent.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}
