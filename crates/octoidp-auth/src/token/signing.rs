//! JWT signing keys and compact JWS encoding.
//!
//! Supports RS256, RS384 and ES384. RSA and EC keys can be generated in
//! process or loaded from PEM files; the public halves are published as a
//! JWK set and every issued token names its key in the `kid` header.
//!
//! Expiry is not checked here. [`JwtService::decode`] verifies signature,
//! issuer and audience; `exp`/`nbf` are checked by the token validator
//! against the injected clock.
//!
//! ## Example
//!
//! ```
//! use octoidp_auth::token::signing::{JwtExpectations, JwtService, SigningAlgorithm, SigningKeyPair};
//!
//! let key = SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap();
//! let service = JwtService::new(key);
//!
//! let mut claims = serde_json::Map::new();
//! claims.insert("iss".into(), "https://idp.example.com".into());
//! claims.insert("sub".into(), "alice".into());
//!
//! let jwt = service.encode(&claims).unwrap();
//! let decoded = service
//!     .decode(&jwt, &JwtExpectations::issuer("https://idp.example.com"))
//!     .unwrap();
//! assert_eq!(decoded["sub"], "alice");
//! ```

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::{DecodePrivateKey, EncodePrivateKey as EcEncodePrivateKey};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha384};
use time::OffsetDateTime;

use crate::error::AuthError;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Failed to encode token: {message}")]
    EncodingError { message: String },

    #[error("Failed to decode token: {message}")]
    DecodingError { message: String },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid claims: {message}")]
    InvalidClaims { message: String },

    #[error("Key not found: {kid}")]
    KeyNotFound { kid: String },

    #[error("Key generation error: {message}")]
    KeyGenerationError { message: String },

    #[error("Invalid key: {message}")]
    InvalidKey { message: String },
}

impl JwtError {
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    #[must_use]
    pub fn key_generation_error(message: impl Into<String>) -> Self {
        Self::KeyGenerationError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns `true` if the presented token is at fault, not the server.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::DecodingError { .. }
                | Self::InvalidSignature
                | Self::InvalidClaims { .. }
                | Self::KeyNotFound { .. }
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ExpiredSignature
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        if err.is_validation_error() {
            AuthError::invalid_token(err.to_string())
        } else {
            AuthError::signing(err.to_string())
        }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported JWS algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    RS256,
    RS384,
    ES384,
}

impl SigningAlgorithm {
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }

    #[must_use]
    pub fn is_ec(&self) -> bool {
        matches!(self, Self::ES384)
    }

    /// `at_hash` / `c_hash` of `value`: the left-most half of its digest,
    /// using the hash of this algorithm, base64url encoded.
    #[must_use]
    pub fn left_half_hash(&self, value: &str) -> String {
        let digest: Vec<u8> = match self {
            Self::RS256 => Sha256::digest(value.as_bytes()).to_vec(),
            Self::RS384 | Self::ES384 => Sha384::digest(value.as_bytes()).to_vec(),
        };
        URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// JSON Web Key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// "RSA" or "EC".
    pub kty: String,

    pub kid: String,

    #[serde(rename = "use")]
    pub use_: String,

    pub alg: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

// ============================================================================
// Signing Key Pair
// ============================================================================

/// A signing key with its public half.
pub struct SigningKeyPair {
    pub kid: String,
    pub algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_data: PublicKeyData,
    pub created_at: OffsetDateTime,
}

enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

impl SigningKeyPair {
    /// Generates a 2048 bit RSA key.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails or `algorithm` is not RSA-based.
    pub fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        if !algorithm.is_rsa() {
            return Err(JwtError::invalid_key(format!(
                "Algorithm {algorithm} is not RSA-based"
            )));
        }

        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        let private_pem = rsa::pkcs8::EncodePrivateKey::to_pkcs8_pem(&private_key, LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        Self::from_pem(
            uuid::Uuid::new_v4().simple().to_string(),
            algorithm,
            &private_pem,
            &public_pem,
        )
    }

    /// Generates a P-384 key for ES384.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn generate_ec() -> Result<Self, JwtError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        Self::from_pem(
            uuid::Uuid::new_v4().simple().to_string(),
            SigningAlgorithm::ES384,
            &private_pem,
            "",
        )
    }

    /// Loads a key pair from PEM.
    ///
    /// RSA keys need both halves. For EC keys the public key is derived from
    /// the private key (PKCS#8 or SEC1) and `public_pem` is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM data is invalid.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<Self, JwtError> {
        let (encoding_key, decoding_key, public_key_data) = if algorithm.is_rsa() {
            let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;

            let public_key = RsaPublicKey::from_public_key_pem(public_pem)
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            let n = public_key.n().to_bytes_be();
            let e = public_key.e().to_bytes_be();

            (encoding_key, decoding_key, PublicKeyData::Rsa { n, e })
        } else {
            let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
                .or_else(|_| EcSecretKey::from_sec1_pem(private_pem))
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            // jsonwebtoken only reads PKCS#8 EC keys.
            let pkcs8_pem = secret_key
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            let encoding_key = EncodingKey::from_ec_pem(pkcs8_pem.as_bytes())
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;

            let signing_key = EcSigningKey::from(&secret_key);
            let point = signing_key.verifying_key().to_encoded_point(false);
            let x = point
                .x()
                .ok_or_else(|| JwtError::invalid_key("Missing x coordinate"))?;
            let y = point
                .y()
                .ok_or_else(|| JwtError::invalid_key("Missing y coordinate"))?;

            let x_b64 = URL_SAFE_NO_PAD.encode(x.as_slice());
            let y_b64 = URL_SAFE_NO_PAD.encode(y.as_slice());
            let decoding_key = DecodingKey::from_ec_components(&x_b64, &y_b64)
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;

            (
                encoding_key,
                decoding_key,
                PublicKeyData::Ec {
                    x: x.to_vec(),
                    y: y.to_vec(),
                },
            )
        };

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Exports the public key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        match &self.public_key_data {
            PublicKeyData::Rsa { n, e } => Jwk {
                kty: "RSA".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                crv: None,
                x: None,
                y: None,
            },
            PublicKeyData::Ec { x, y } => Jwk {
                kty: "EC".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: None,
                e: None,
                crv: Some("P-384".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
            },
        }
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// JWT Service
// ============================================================================

/// What a decoded JWT must carry besides a valid signature.
#[derive(Debug, Clone, Copy)]
pub struct JwtExpectations<'a> {
    pub issuer: &'a str,
    /// `None` skips the audience check.
    pub audience: Option<&'a str>,
}

impl<'a> JwtExpectations<'a> {
    #[must_use]
    pub fn issuer(issuer: &'a str) -> Self {
        Self {
            issuer,
            audience: None,
        }
    }

    #[must_use]
    pub fn with_audience(mut self, audience: &'a str) -> Self {
        self.audience = Some(audience);
        self
    }
}

/// Signs with the active key and verifies against every published key.
pub struct JwtService {
    signing_key: SigningKeyPair,
    /// Retired keys still accepted for verification.
    validation_keys: Vec<SigningKeyPair>,
}

impl JwtService {
    #[must_use]
    pub fn new(signing_key: SigningKeyPair) -> Self {
        Self {
            signing_key,
            validation_keys: Vec::new(),
        }
    }

    /// Keeps accepting tokens signed by `key` during key rollover.
    #[must_use]
    pub fn with_validation_key(mut self, key: SigningKeyPair) -> Self {
        self.validation_keys.push(key);
        self
    }

    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.signing_key.algorithm
    }

    #[must_use]
    pub fn current_kid(&self) -> &str {
        &self.signing_key.kid
    }

    /// Encodes `claims` as a compact JWS with the active key.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, claims: &Map<String, Value>) -> Result<String, JwtError> {
        let mut header = Header::new(self.signing_key.algorithm.to_jwt_algorithm());
        header.kid = Some(self.signing_key.kid.clone());

        encode(&header, claims, &self.signing_key.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    fn key_for(&self, kid: Option<&str>) -> Result<&SigningKeyPair, JwtError> {
        match kid {
            None => Ok(&self.signing_key),
            Some(kid) => std::iter::once(&self.signing_key)
                .chain(&self.validation_keys)
                .find(|key| key.kid == kid)
                .ok_or_else(|| JwtError::key_not_found(kid)),
        }
    }

    /// Verifies signature, issuer and (optionally) audience.
    ///
    /// `exp` and `nbf` are returned unchecked.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, signed by an unknown key
    /// or fails a check.
    pub fn decode(
        &self,
        token: &str,
        expectations: &JwtExpectations<'_>,
    ) -> Result<Map<String, Value>, JwtError> {
        let header = decode_header(token)?;
        let key = self.key_for(header.kid.as_deref())?;

        let mut validation = Validation::new(key.algorithm.to_jwt_algorithm());
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_issuer(&[expectations.issuer]);
        match expectations.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<Map<String, Value>>(token, &key.decoding_key, &validation)?;
        Ok(data.claims)
    }

    /// The JWK set of every key accepted for verification.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: std::iter::once(&self.signing_key)
                .chain(&self.validation_keys)
                .map(SigningKeyPair::to_jwk)
                .collect(),
        }
    }
}

impl fmt::Debug for JwtService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtService")
            .field("signing_key", &self.signing_key)
            .field("validation_keys", &self.validation_keys.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUER: &str = "https://idp.example.com";

    fn claims() -> Map<String, Value> {
        let mut claims = Map::new();
        claims.insert("iss".into(), ISSUER.into());
        claims.insert("aud".into(), "api".into());
        claims.insert("sub".into(), "alice".into());
        claims.insert("exp".into(), 1.into());
        claims
    }

    #[test]
    fn test_rs256_encode_decode_ignores_expiry() {
        let service = JwtService::new(SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap());
        let token = service.encode(&claims()).unwrap();
        assert_eq!(token.matches('.').count(), 2);

        let decoded = service
            .decode(&token, &JwtExpectations::issuer(ISSUER).with_audience("api"))
            .unwrap();
        assert_eq!(decoded["sub"], "alice");
    }

    #[test]
    fn test_es384_encode_decode() {
        let service = JwtService::new(SigningKeyPair::generate_ec().unwrap());
        let token = service.encode(&claims()).unwrap();
        let decoded = service.decode(&token, &JwtExpectations::issuer(ISSUER)).unwrap();
        assert_eq!(decoded["sub"], "alice");
    }

    #[test]
    fn test_wrong_issuer_or_audience_rejected() {
        let service = JwtService::new(SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap());
        let token = service.encode(&claims()).unwrap();

        assert!(matches!(
            service.decode(&token, &JwtExpectations::issuer("https://other")),
            Err(JwtError::InvalidClaims { .. })
        ));
        assert!(matches!(
            service.decode(&token, &JwtExpectations::issuer(ISSUER).with_audience("other")),
            Err(JwtError::InvalidClaims { .. })
        ));
    }

    #[test]
    fn test_foreign_key_rejected() {
        let ours = JwtService::new(SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap());
        let theirs = JwtService::new(SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap());
        let token = theirs.encode(&claims()).unwrap();

        let err = ours.decode(&token, &JwtExpectations::issuer(ISSUER)).unwrap_err();
        assert!(matches!(err, JwtError::KeyNotFound { .. }));
        assert!(matches!(AuthError::from(err), AuthError::InvalidToken { .. }));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let service = JwtService::new(SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap());
        let token = service.encode(&claims()).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(r#"{"iss":"https://idp.example.com","sub":"mallory"}"#);
        parts[1] = &forged;
        let forged_token = parts.join(".");

        assert!(matches!(
            service.decode(&forged_token, &JwtExpectations::issuer(ISSUER)),
            Err(JwtError::InvalidSignature)
        ));
        assert!(service.decode("not-a-jwt", &JwtExpectations::issuer(ISSUER)).is_err());
    }

    #[test]
    fn test_rollover_key_still_verifies() {
        let old = SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap();
        let old_service = JwtService::new(old);
        let token = old_service.encode(&claims()).unwrap();
        let old_pem_kid = old_service.current_kid().to_string();

        let JwtService { signing_key: old, .. } = old_service;
        let service = JwtService::new(SigningKeyPair::generate_ec().unwrap()).with_validation_key(old);

        assert!(service.decode(&token, &JwtExpectations::issuer(ISSUER)).is_ok());
        let jwks = service.jwks();
        assert_eq!(jwks.keys.len(), 2);
        assert!(jwks.keys.iter().any(|key| key.kid == old_pem_kid && key.kty == "RSA"));
        assert!(jwks.keys.iter().any(|key| key.kty == "EC" && key.crv.as_deref() == Some("P-384")));
    }

    #[test]
    fn test_left_half_hash() {
        // OpenID Connect Core example access token and at_hash.
        let access_token = "jHkWEdUXMU1BwAsC4vtUsZwnNvTIxEl0z9K3vx5KF0Y";
        assert_eq!(
            SigningAlgorithm::RS256.left_half_hash(access_token),
            "77QmUPtjPfzWtF2AnpK9RQ"
        );
        assert_eq!(SigningAlgorithm::RS384.left_half_hash("x").len(), 32);
    }

    #[test]
    fn test_algorithm_serde() {
        let json = serde_json::to_string(&SigningAlgorithm::ES384).unwrap();
        assert_eq!(json, "\"ES384\"");
        let parsed: SigningAlgorithm = serde_json::from_str("\"RS384\"").unwrap();
        assert!(parsed.is_rsa());
    }
}
