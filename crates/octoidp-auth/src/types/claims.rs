//! Claims and authenticated subjects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Well-known claim types.
pub mod claim_types {
    pub const SUBJECT: &str = "sub";
    pub const NAME: &str = "name";
    pub const ISSUER: &str = "iss";
    pub const AUDIENCE: &str = "aud";
    pub const EXPIRATION: &str = "exp";
    pub const NOT_BEFORE: &str = "nbf";
    pub const ISSUED_AT: &str = "iat";
    pub const JWT_ID: &str = "jti";
    pub const CLIENT_ID: &str = "client_id";
    pub const SCOPE: &str = "scope";
    pub const AUTHENTICATION_TIME: &str = "auth_time";
    pub const AUTHENTICATION_METHOD: &str = "amr";
    pub const IDENTITY_PROVIDER: &str = "idp";
    pub const NONCE: &str = "nonce";
    pub const ACCESS_TOKEN_HASH: &str = "at_hash";
    pub const AUTHORIZATION_CODE_HASH: &str = "c_hash";
    pub const CONFIRMATION: &str = "cnf";
    pub const EMAIL: &str = "email";
    pub const EMAIL_VERIFIED: &str = "email_verified";

    /// Claim types the engine sets itself. Profile data may not override them.
    pub const PROTOCOL: &[&str] = &[
        SUBJECT,
        ISSUER,
        AUDIENCE,
        EXPIRATION,
        NOT_BEFORE,
        ISSUED_AT,
        JWT_ID,
        CLIENT_ID,
        SCOPE,
        AUTHENTICATION_TIME,
        AUTHENTICATION_METHOD,
        IDENTITY_PROVIDER,
        NONCE,
        ACCESS_TOKEN_HASH,
        AUTHORIZATION_CODE_HASH,
        CONFIRMATION,
    ];
}

/// Identity provider name of locally authenticated users.
pub const LOCAL_IDENTITY_PROVIDER: &str = "idsrv";

/// A typed claim. Values are JSON so numbers and booleans survive into tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: Value,
}

impl Claim {
    #[must_use]
    pub fn new(claim_type: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }

    /// The value as a string, if it is one.
    #[must_use]
    pub fn value_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Returns `true` for claim types that are reserved for the engine.
    #[must_use]
    pub fn is_protocol_claim(&self) -> bool {
        claim_types::PROTOCOL.contains(&self.claim_type.as_str())
    }
}

/// Folds claims into a JSON object.
///
/// A claim type that occurs once becomes a scalar; repeated types become an
/// array. Types listed in `always_array` are arrays even with a single value.
#[must_use]
pub fn claims_to_object(claims: &[Claim], always_array: &[&str]) -> Map<String, Value> {
    let mut object = Map::new();
    for claim in claims {
        match object.get_mut(&claim.claim_type) {
            Some(Value::Array(values)) => values.push(claim.value.clone()),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, claim.value.clone()]);
            }
            None => {
                let value = if always_array.contains(&claim.claim_type.as_str()) {
                    Value::Array(vec![claim.value.clone()])
                } else {
                    claim.value.clone()
                };
                object.insert(claim.claim_type.clone(), value);
            }
        }
    }
    object
}

/// An authenticated end user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub subject_id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub auth_time: OffsetDateTime,

    /// Authentication method references (`amr`), e.g. `pwd`.
    #[serde(default)]
    pub authentication_methods: Vec<String>,

    #[serde(default = "default_identity_provider")]
    pub identity_provider: String,

    /// Additional claims established at login.
    #[serde(default)]
    pub claims: Vec<Claim>,
}

fn default_identity_provider() -> String {
    LOCAL_IDENTITY_PROVIDER.to_string()
}

impl Subject {
    /// A locally authenticated subject.
    #[must_use]
    pub fn local(
        subject_id: impl Into<String>,
        authentication_method: impl Into<String>,
        auth_time: OffsetDateTime,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            name: None,
            auth_time,
            authentication_methods: vec![authentication_method.into()],
            identity_provider: LOCAL_IDENTITY_PROVIDER.to_string(),
            claims: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// `sub`, `auth_time`, `idp` and one `amr` claim per method.
    #[must_use]
    pub fn standard_claims(&self) -> Vec<Claim> {
        let mut claims = vec![
            Claim::new(claim_types::SUBJECT, self.subject_id.clone()),
            Claim::new(
                claim_types::AUTHENTICATION_TIME,
                self.auth_time.unix_timestamp(),
            ),
            Claim::new(claim_types::IDENTITY_PROVIDER, self.identity_provider.clone()),
        ];
        claims.extend(
            self.authentication_methods
                .iter()
                .map(|amr| Claim::new(claim_types::AUTHENTICATION_METHOD, amr.clone())),
        );
        claims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_claims_to_object_folds_repeated_types() {
        let claims = vec![
            Claim::new("sub", "alice"),
            Claim::new("role", "admin"),
            Claim::new("role", "user"),
            Claim::new("scope", "read"),
            Claim::new("auth_time", 1_700_000_000),
        ];
        let object = claims_to_object(&claims, &["scope"]);

        assert_eq!(object["sub"], "alice");
        assert_eq!(object["role"], serde_json::json!(["admin", "user"]));
        assert_eq!(object["scope"], serde_json::json!(["read"]));
        assert_eq!(object["auth_time"], 1_700_000_000);
    }

    #[test]
    fn test_standard_claims() {
        let subject = Subject::local("818727", "pwd", datetime!(2024-01-01 00:00 UTC));
        let claims = subject.standard_claims();
        let object = claims_to_object(&claims, &["amr"]);

        assert_eq!(object["sub"], "818727");
        assert_eq!(object["idp"], LOCAL_IDENTITY_PROVIDER);
        assert_eq!(object["amr"], serde_json::json!(["pwd"]));
        assert_eq!(object["auth_time"], 1_704_067_200);
    }

    #[test]
    fn test_protocol_claims() {
        assert!(Claim::new("sub", "x").is_protocol_claim());
        assert!(!Claim::new("email", "x").is_protocol_claim());
    }
}
