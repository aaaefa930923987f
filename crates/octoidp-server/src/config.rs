//! Server configuration.
//!
//! Loaded from a TOML file layered under `OCTOIDP__SECTION__KEY` environment
//! overrides, e.g. `OCTOIDP__SERVER__PORT=9090` or
//! `OCTOIDP__IDP__ISSUER_URI=https://idp.example.com`.
//!
//! ```toml
//! [server]
//! port = 5000
//!
//! [idp]
//! issuer_uri = "https://idp.example.com"
//!
//! [[seed.clients]]
//! client_id = "web"
//! flow = "authorization_code_with_proof_key"
//! redirect_uris = ["https://app.example.com/cb"]
//! allowed_scopes = ["openid", "profile"]
//! secrets = ["change-me"]
//!
//! [[seed.users]]
//! subject_id = "1"
//! username = "alice"
//! password = "alice"
//! claims = { name = "Alice", email = "alice@example.com" }
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use ::config::{Config, Environment, File};
use octoidp_auth::crypto;
use octoidp_auth::services::InMemoryUser;
use octoidp_auth::types::{Client, Scope, Secret, StandardScopes};
use octoidp_auth::{AuthResult, IdpOptions};
use serde::{Deserialize, Serialize};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "octoidp.toml";

/// Root configuration of the server binary.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub idp: IdpOptions,
    #[serde(default)]
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds between sweeps of expired codes and tokens.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_purge_interval_secs() -> u64 {
    60
}

impl ListenConfig {
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn addr(&self) -> Result<SocketAddr, ServerConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ServerConfigError::Invalid(format!("listen address: {e}")))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// =============================================================================
// Seed data
// =============================================================================

/// Clients, scopes and users loaded into the in-memory stores at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SeedConfig {
    pub clients: Vec<SeedClient>,
    /// Replaces the standard identity scopes when non-empty.
    pub scopes: Vec<Scope>,
    pub users: Vec<SeedUser>,
}

/// A client registration with plaintext secrets.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SeedClient {
    #[serde(flatten)]
    pub client: Client,
    #[serde(default)]
    pub secrets: Vec<String>,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct SeedUser {
    pub subject_id: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub claims: BTreeMap<String, serde_json::Value>,
}

impl std::fmt::Debug for SeedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedUser")
            .field("subject_id", &self.subject_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl SeedConfig {
    /// Client registrations with their secrets hashed.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid registration or if hashing fails.
    pub fn clients(&self) -> Result<Vec<Client>, ServerConfigError> {
        self.clients
            .iter()
            .map(|seed| {
                let mut client = seed.client.clone();
                for secret in &seed.secrets {
                    let hash = crypto::hash_secret(secret)
                        .map_err(|e| ServerConfigError::Invalid(e.to_string()))?;
                    client.client_secrets.push(Secret::hashed(hash));
                }
                client.validate().map_err(|e| {
                    ServerConfigError::Invalid(format!("client '{}': {e}", client.client_id))
                })?;
                Ok(client)
            })
            .collect()
    }

    #[must_use]
    pub fn scopes(&self) -> Vec<Scope> {
        if self.scopes.is_empty() {
            StandardScopes::all()
        } else {
            self.scopes.clone()
        }
    }

    /// # Errors
    ///
    /// Returns `AuthError::Internal` if hashing fails.
    pub fn users(&self) -> AuthResult<Vec<InMemoryUser>> {
        self.users
            .iter()
            .map(|seed| {
                let user =
                    InMemoryUser::with_password(&seed.subject_id, &seed.username, &seed.password)?;
                Ok(seed
                    .claims
                    .iter()
                    .fold(user, |user, (claim_type, value)| {
                        user.with_claim(claim_type, value.clone())
                    }))
            })
            .collect()
    }
}

// =============================================================================
// Loading
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ServerConfigError {
    #[error("config build error: {0}")]
    Build(#[from] ::config::ConfigError),

    #[error(transparent)]
    Idp(#[from] octoidp_auth::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ServerConfig {
    /// Checks everything except the seeded clients, which are validated
    /// by [`SeedConfig::clients`].
    ///
    /// # Errors
    ///
    /// Returns the first inconsistent value.
    pub fn validate(&self) -> Result<(), ServerConfigError> {
        self.idp.validate()?;
        self.server.addr()?;
        if self.server.purge_interval_secs == 0 {
            return Err(ServerConfigError::Invalid(
                "server.purge_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads `path` (skipped when the file does not exist) and the
/// `OCTOIDP__` environment overrides, then validates the result.
///
/// # Errors
///
/// Returns an error for unparseable sources or invalid values.
pub fn load_config(path: &Path) -> Result<ServerConfig, ServerConfigError> {
    let mut builder = Config::builder();
    if path.exists() {
        builder = builder.add_source(File::from(path));
    }
    builder = builder.add_source(
        Environment::with_prefix("OCTOIDP")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let merged: ServerConfig = builder.build()?.try_deserialize()?;
    merged.validate()?;
    Ok(merged)
}
