use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::claims::Subject;
use crate::validation::pkce::ProofKeyChallenge;

/// A single-use authorization code.
///
/// Every binding is fixed when the code is issued. There are no setters, so
/// the captured PKCE challenge cannot change for the lifetime of the code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    client_id: String,
    subject: Subject,
    redirect_uri: String,
    requested_scopes: Vec<String>,
    is_open_id: bool,
    nonce: Option<String>,
    proof_key: Option<ProofKeyChallenge>,
    was_consent_shown: bool,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    lifetime: u64,
}

/// Inputs of [`AuthorizationCode::issue`].
#[derive(Debug, Clone)]
pub struct CodeBinding {
    pub client_id: String,
    pub subject: Subject,
    pub redirect_uri: String,
    pub requested_scopes: Vec<String>,
    pub is_open_id: bool,
    pub nonce: Option<String>,
    pub proof_key: Option<ProofKeyChallenge>,
    pub was_consent_shown: bool,
}

impl AuthorizationCode {
    /// Creates a code that expires `lifetime` seconds after `created_at`.
    #[must_use]
    pub fn issue(binding: CodeBinding, created_at: OffsetDateTime, lifetime: u64) -> Self {
        Self {
            client_id: binding.client_id,
            subject: binding.subject,
            redirect_uri: binding.redirect_uri,
            requested_scopes: binding.requested_scopes,
            is_open_id: binding.is_open_id,
            nonce: binding.nonce,
            proof_key: binding.proof_key,
            was_consent_shown: binding.was_consent_shown,
            created_at,
            lifetime,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    #[must_use]
    pub fn requested_scopes(&self) -> &[String] {
        &self.requested_scopes
    }

    #[must_use]
    pub fn is_open_id(&self) -> bool {
        self.is_open_id
    }

    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    #[must_use]
    pub fn proof_key(&self) -> Option<&ProofKeyChallenge> {
        self.proof_key.as_ref()
    }

    #[must_use]
    pub fn was_consent_shown(&self) -> bool {
        self.was_consent_shown
    }

    #[must_use]
    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        super::expires_after(self.created_at, self.lifetime)
    }

    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use time::macros::datetime;

    #[test]
    fn test_expiry() {
        let created = datetime!(2024-01-01 00:00 UTC);
        let code = AuthorizationCode::issue(
            CodeBinding {
                client_id: "c".to_string(),
                subject: Subject::local("bob", "pwd", created),
                redirect_uri: "https://app/cb".to_string(),
                requested_scopes: vec!["openid".to_string()],
                is_open_id: true,
                nonce: Some("n".to_string()),
                proof_key: None,
                was_consent_shown: false,
            },
            created,
            300,
        );

        assert!(!code.is_expired(created + Duration::seconds(299)));
        assert!(code.is_expired(created + Duration::seconds(300)));
        assert_eq!(code.nonce(), Some("n"));
    }
}
