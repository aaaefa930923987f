//! Issued tokens in their server-side representation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::claims::{Claim, Subject, claim_types, claims_to_object};
use super::client::AccessTokenType;

/// Access or identity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    AccessToken,
    IdentityToken,
}

/// Public key a proof-of-possession token is bound to (RSA JWK).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationKey {
    pub kty: String,
    pub n: String,
    pub e: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

impl ConfirmationKey {
    /// The `cnf` claim value.
    #[must_use]
    pub fn to_cnf(&self) -> Value {
        let mut jwk = Map::new();
        jwk.insert("kty".to_string(), Value::String(self.kty.clone()));
        jwk.insert("n".to_string(), Value::String(self.n.clone()));
        jwk.insert("e".to_string(), Value::String(self.e.clone()));
        if let Some(alg) = &self.alg {
            jwk.insert("alg".to_string(), Value::String(alg.clone()));
        }
        serde_json::json!({ "jwk": Value::Object(jwk) })
    }
}

/// A token before it is signed or stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub issuer: String,
    pub audience: String,
    pub client_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Seconds.
    pub lifetime: u64,
    pub access_token_type: AccessTokenType,
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub confirmation: Option<ConfirmationKey>,
}

impl Token {
    #[must_use]
    pub fn subject_id(&self) -> Option<&str> {
        self.claims
            .iter()
            .find(|claim| claim.claim_type == claim_types::SUBJECT)
            .and_then(Claim::value_str)
    }

    /// Scope names carried by the `scope` claims.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.claims
            .iter()
            .filter(|claim| claim.claim_type == claim_types::SCOPE)
            .filter_map(Claim::value_str)
            .collect()
    }

    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        super::expires_after(self.created_at, self.lifetime)
    }

    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at()
    }

    /// The JWT payload / introspection claim set of this token.
    #[must_use]
    pub fn to_claims_object(&self) -> Map<String, Value> {
        let always_array: &[&str] = match self.kind {
            TokenKind::AccessToken => &[claim_types::SCOPE, claim_types::AUTHENTICATION_METHOD],
            TokenKind::IdentityToken => &[claim_types::AUTHENTICATION_METHOD],
        };
        let mut object = claims_to_object(&self.claims, always_array);

        let issued_at = self.created_at.unix_timestamp();
        object.insert(claim_types::ISSUER.to_string(), Value::String(self.issuer.clone()));
        object.insert(
            claim_types::AUDIENCE.to_string(),
            Value::String(self.audience.clone()),
        );
        object.insert(claim_types::ISSUED_AT.to_string(), Value::from(issued_at));
        object.insert(claim_types::NOT_BEFORE.to_string(), Value::from(issued_at));
        object.insert(
            claim_types::EXPIRATION.to_string(),
            Value::from(self.expires_at().unix_timestamp()),
        );
        if let Some(key) = &self.confirmation {
            object.insert(claim_types::CONFIRMATION.to_string(), key.to_cnf());
        }
        object
    }
}

/// A refresh token as kept by the refresh token store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub access_token: Token,
    pub subject: Subject,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Seconds, counted from `created_at`.
    pub lifetime: u64,
    /// Incremented on every refresh.
    pub version: u32,
}

impl RefreshToken {
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.access_token.client_id
    }

    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.access_token.scopes()
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
    use time::macros::datetime;

    fn access_token() -> Token {
        Token {
            kind: TokenKind::AccessToken,
            issuer: "https://idp.example.com".to_string(),
            audience: "https://idp.example.com/resources".to_string(),
            client_id: "c1".to_string(),
            created_at: datetime!(2024-01-01 00:00 UTC),
            lifetime: 3600,
            access_token_type: AccessTokenType::Reference,
            claims: vec![
                Claim::new("client_id", "c1"),
                Claim::new("scope", "read"),
                Claim::new("scope", "write"),
                Claim::new("sub", "alice"),
            ],
            confirmation: None,
        }
    }

    #[test]
    fn test_claims_object() {
        let object = access_token().to_claims_object();
        assert_eq!(object["iss"], "https://idp.example.com");
        assert_eq!(object["aud"], "https://idp.example.com/resources");
        assert_eq!(object["iat"], 1_704_067_200);
        assert_eq!(object["exp"], 1_704_070_800);
        assert_eq!(object["scope"], serde_json::json!(["read", "write"]));
        assert_eq!(object["sub"], "alice");
        assert!(object.get("cnf").is_none());
    }

    #[test]
    fn test_confirmation_claim() {
        let mut token = access_token();
        token.confirmation = Some(ConfirmationKey {
            kty: "RSA".to_string(),
            n: "0vx7".to_string(),
            e: "AQAB".to_string(),
            alg: None,
        });
        let object = token.to_claims_object();
        assert_eq!(
            object["cnf"],
            serde_json::json!({ "jwk": { "kty": "RSA", "n": "0vx7", "e": "AQAB" } })
        );
    }

    #[test]
    fn test_single_scope_is_still_an_array() {
        let mut token = access_token();
        token.claims.retain(|c| !(c.claim_type == "scope" && c.value == "write"));
        assert_eq!(token.to_claims_object()["scope"], serde_json::json!(["read"]));
        assert_eq!(token.scopes(), vec!["read"]);
        assert_eq!(token.subject_id(), Some("alice"));
    }
}
