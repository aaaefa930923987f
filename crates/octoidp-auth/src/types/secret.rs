use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::crypto;

/// A hashed shared secret of a client or a resource scope.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    /// Argon2 PHC string.
    pub value: String,

    #[serde(default)]
    pub description: Option<String>,

    /// The secret stops matching at this instant.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expiration: Option<OffsetDateTime>,
}

impl Secret {
    /// Wraps an already hashed value.
    #[must_use]
    pub fn hashed(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            description: None,
            expiration: None,
        }
    }

    #[must_use]
    pub fn with_expiration(mut self, expiration: OffsetDateTime) -> Self {
        self.expiration = Some(expiration);
        self
    }

    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expiration.is_some_and(|expiration| expiration <= now)
    }

    /// Returns `true` if `presented` matches and the secret has not expired.
    #[must_use]
    pub fn matches(&self, presented: &str, now: OffsetDateTime) -> bool {
        !self.is_expired(now) && crypto::verify_secret(presented, &self.value)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("description", &self.description)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// Returns `true` if any of `secrets` matches `presented`.
#[must_use]
pub fn any_secret_matches(secrets: &[Secret], presented: &str, now: OffsetDateTime) -> bool {
    secrets.iter().any(|secret| secret.matches(presented, now))
}
