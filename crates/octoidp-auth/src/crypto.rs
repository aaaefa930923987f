//! Secret hashing and opaque handle generation.
//!
//! Client and scope secrets, as well as local user passwords, are stored as
//! Argon2id PHC strings. Authorization codes, reference tokens and refresh
//! tokens are 256-bit random values, base64url encoded.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;

use crate::error::AuthError;
use crate::AuthResult;

/// Number of random bytes behind every opaque handle.
pub const HANDLE_BYTES: usize = 32;

/// Generates a new opaque handle (43 base64url characters).
#[must_use]
pub fn generate_handle() -> String {
    let mut bytes = [0u8; HANDLE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hashes a secret for storage.
///
/// # Errors
///
/// Returns `AuthError::Internal` if hashing fails.
pub fn hash_secret(secret: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::internal(format!("secret hashing failed: {e}")))
}

/// Checks a presented secret against a stored PHC string.
///
/// A malformed stored hash never matches.
#[must_use]
pub fn verify_secret(presented: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(presented.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored secret is not a valid PHC string");
            false
        }
    }
}
