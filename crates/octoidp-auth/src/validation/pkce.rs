//! PKCE (Proof Key for Code Exchange, RFC 7636).
//!
//! The authorize endpoint captures `code_challenge` and
//! `code_challenge_method` with [`PkceValidator::validate_challenge`]; the
//! token endpoint checks the `code_verifier` against the captured pair with
//! [`PkceValidator::validate_verifier`]. Both `plain` and `S256` are
//! supported and both comparisons are constant-time.
//!
//! # Example
//!
//! ```
//! use octoidp_auth::config::PkceOptions;
//! use octoidp_auth::validation::pkce::{PkceValidator, generate_code_verifier, s256_challenge};
//!
//! let validator = PkceValidator::new(PkceOptions::default());
//! let verifier = generate_code_verifier();
//! let challenge = s256_challenge(&verifier);
//!
//! let captured = validator
//!     .validate_challenge(Some(&challenge), Some("S256"), true)
//!     .unwrap()
//!     .unwrap();
//! assert!(validator.validate_verifier(Some(&verifier), &captured).is_ok());
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::PkceOptions;

// =============================================================================
// Challenge Method
// =============================================================================

/// Transformation applied to the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    #[serde(rename = "plain")]
    Plain,
    S256,
}

impl CodeChallengeMethod {
    /// Parses the `code_challenge_method` parameter (case-sensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "plain" => Some(Self::Plain),
            "S256" => Some(Self::S256),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl std::fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Captured Challenge
// =============================================================================

/// A validated challenge and its method, as captured at authorize time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofKeyChallenge {
    challenge: String,
    method: CodeChallengeMethod,
}

impl ProofKeyChallenge {
    #[must_use]
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    #[must_use]
    pub fn method(&self) -> CodeChallengeMethod {
        self.method
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Reasons a PKCE check fails.
///
/// The token endpoint collapses every variant into a single `invalid_grant`;
/// the variants exist for logging only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PkceError {
    #[error("code_challenge missing")]
    ChallengeMissing,

    #[error("code_challenge length {0} outside configured bounds")]
    ChallengeLength(usize),

    #[error("unsupported code_challenge_method: {0}")]
    UnsupportedMethod(String),

    #[error("code_verifier missing")]
    VerifierMissing,

    #[error("code_verifier length {0} outside configured bounds")]
    VerifierLength(usize),

    #[error("code_verifier does not match code_challenge")]
    VerifierMismatch,
}

// =============================================================================
// Validator
// =============================================================================

/// Applies PKCE policy from [`PkceOptions`].
#[derive(Debug, Clone)]
pub struct PkceValidator {
    options: PkceOptions,
}

impl PkceValidator {
    #[must_use]
    pub fn new(options: PkceOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &PkceOptions {
        &self.options
    }

    /// Validates the challenge pair of an authorize request.
    ///
    /// Returns `Ok(None)` when no challenge was sent and none is `required`.
    /// A missing method means `plain`.
    ///
    /// # Errors
    ///
    /// Returns [`PkceError::ChallengeMissing`], [`PkceError::ChallengeLength`]
    /// or [`PkceError::UnsupportedMethod`].
    pub fn validate_challenge(
        &self,
        challenge: Option<&str>,
        method: Option<&str>,
        required: bool,
    ) -> Result<Option<ProofKeyChallenge>, PkceError> {
        let Some(challenge) = challenge else {
            return if required {
                Err(PkceError::ChallengeMissing)
            } else {
                Ok(None)
            };
        };

        let length = challenge.len();
        if length < self.options.code_challenge_min_length
            || length > self.options.code_challenge_max_length
        {
            return Err(PkceError::ChallengeLength(length));
        }

        let method = match method {
            None => CodeChallengeMethod::Plain,
            Some(value) => CodeChallengeMethod::parse(value)
                .ok_or_else(|| PkceError::UnsupportedMethod(value.to_string()))?,
        };

        Ok(Some(ProofKeyChallenge {
            challenge: challenge.to_string(),
            method,
        }))
    }

    /// Checks a token request's `code_verifier` against the captured challenge.
    ///
    /// # Errors
    ///
    /// Returns [`PkceError::VerifierMissing`], [`PkceError::VerifierLength`]
    /// or [`PkceError::VerifierMismatch`].
    pub fn validate_verifier(
        &self,
        verifier: Option<&str>,
        captured: &ProofKeyChallenge,
    ) -> Result<(), PkceError> {
        let verifier = verifier.ok_or(PkceError::VerifierMissing)?;

        let length = verifier.len();
        if length < self.options.code_verifier_min_length
            || length > self.options.code_verifier_max_length
        {
            return Err(PkceError::VerifierLength(length));
        }

        let transformed = match captured.method {
            CodeChallengeMethod::Plain => verifier.to_string(),
            CodeChallengeMethod::S256 => s256_challenge(verifier),
        };

        if bool::from(transformed.as_bytes().ct_eq(captured.challenge.as_bytes())) {
            Ok(())
        } else {
            Err(PkceError::VerifierMismatch)
        }
    }

    /// The `error_description` for an authorize-time challenge failure.
    #[must_use]
    pub fn describe(&self, error: &PkceError) -> String {
        match error {
            PkceError::ChallengeMissing => self.options.missing_challenge_message.clone(),
            PkceError::ChallengeLength(_) => self.options.challenge_length_message.clone(),
            PkceError::UnsupportedMethod(_) => self.options.unsupported_method_message.clone(),
            other => other.to_string(),
        }
    }
}

/// `BASE64URL(SHA256(ASCII(verifier)))`.
#[must_use]
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// A fresh 43 character verifier (32 random bytes, base64url).
#[must_use]
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B
    const RFC_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const RFC_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    fn validator() -> PkceValidator {
        PkceValidator::new(PkceOptions::default())
    }

    fn captured(challenge: &str, method: &str) -> ProofKeyChallenge {
        validator()
            .validate_challenge(Some(challenge), Some(method), true)
            .unwrap()
            .unwrap()
    }

    /// Replaces the character at `index` with a different URL-safe one.
    fn mutate(value: &str, index: usize) -> String {
        value
            .char_indices()
            .map(|(i, c)| {
                if i != index {
                    c
                } else if c == 'a' {
                    'b'
                } else {
                    'a'
                }
            })
            .collect()
    }

    #[test]
    fn test_rfc7636_test_vector() {
        assert_eq!(s256_challenge(RFC_VERIFIER), RFC_CHALLENGE);
        let pair = captured(RFC_CHALLENGE, "S256");
        assert!(validator().validate_verifier(Some(RFC_VERIFIER), &pair).is_ok());
    }

    #[test]
    fn test_plain_pairs_match_and_every_mutation_fails() {
        let validator = validator();
        for _ in 0..20 {
            let verifier = generate_code_verifier();
            let pair = captured(&verifier, "plain");
            assert!(validator.validate_verifier(Some(&verifier), &pair).is_ok());

            for index in 0..verifier.len() {
                let mutated = mutate(&verifier, index);
                assert_eq!(
                    validator.validate_verifier(Some(&mutated), &pair),
                    Err(PkceError::VerifierMismatch)
                );
            }
        }
    }

    #[test]
    fn test_s256_pairs_match_and_every_mutation_fails() {
        let validator = validator();
        for _ in 0..20 {
            let verifier = generate_code_verifier();
            let pair = captured(&s256_challenge(&verifier), "S256");
            assert!(validator.validate_verifier(Some(&verifier), &pair).is_ok());

            for index in 0..verifier.len() {
                let mutated = mutate(&verifier, index);
                assert_eq!(
                    validator.validate_verifier(Some(&mutated), &pair),
                    Err(PkceError::VerifierMismatch)
                );
            }
        }
    }

    #[test]
    fn test_s256_verifier_is_not_accepted_as_plain() {
        let pair = captured(RFC_CHALLENGE, "S256");
        assert!(validator().validate_verifier(Some(RFC_CHALLENGE), &pair).is_err());
    }

    #[test]
    fn test_missing_method_defaults_to_plain() {
        let pair = validator()
            .validate_challenge(Some(RFC_VERIFIER), None, false)
            .unwrap()
            .unwrap();
        assert_eq!(pair.method(), CodeChallengeMethod::Plain);
    }

    #[test]
    fn test_challenge_required() {
        let validator = validator();
        assert_eq!(
            validator.validate_challenge(None, None, true),
            Err(PkceError::ChallengeMissing)
        );
        assert_eq!(validator.validate_challenge(None, None, false), Ok(None));
        assert_eq!(
            validator.describe(&PkceError::ChallengeMissing),
            "code challenge required"
        );
    }

    #[test]
    fn test_challenge_length_bounds() {
        let validator = validator();
        let short = "a".repeat(42);
        let long = "a".repeat(129);
        assert_eq!(
            validator.validate_challenge(Some(&short), Some("plain"), true),
            Err(PkceError::ChallengeLength(42))
        );
        assert_eq!(
            validator.validate_challenge(Some(&long), Some("plain"), true),
            Err(PkceError::ChallengeLength(129))
        );
        assert!(
            validator
                .validate_challenge(Some(&"a".repeat(43)), Some("plain"), true)
                .is_ok()
        );
        assert!(
            validator
                .validate_challenge(Some(&"a".repeat(128)), Some("plain"), true)
                .is_ok()
        );
        assert_eq!(
            validator.describe(&PkceError::ChallengeLength(42)),
            "code_challenge is either too short or too long"
        );
    }

    #[test]
    fn test_unsupported_method() {
        let validator = validator();
        let result = validator.validate_challenge(Some(RFC_CHALLENGE), Some("s256"), true);
        assert_eq!(result, Err(PkceError::UnsupportedMethod("s256".to_string())));
        assert_eq!(
            validator.describe(&result.unwrap_err()),
            "transform algorithm not supported"
        );
    }

    #[test]
    fn test_verifier_length_bounds() {
        let validator = validator();
        let short = "a".repeat(42);
        let pair = captured(&short.repeat(2)[..43], "plain");
        assert_eq!(
            validator.validate_verifier(Some(&short), &pair),
            Err(PkceError::VerifierLength(42))
        );
        assert_eq!(
            validator.validate_verifier(None, &pair),
            Err(PkceError::VerifierMissing)
        );
    }

    #[test]
    fn test_configured_bounds_apply() {
        let options = PkceOptions {
            code_challenge_min_length: 10,
            code_verifier_min_length: 10,
            ..PkceOptions::default()
        };
        let validator = PkceValidator::new(options);
        let pair = validator
            .validate_challenge(Some("abcdefghij"), Some("plain"), true)
            .unwrap()
            .unwrap();
        assert!(validator.validate_verifier(Some("abcdefghij"), &pair).is_ok());
    }
}
