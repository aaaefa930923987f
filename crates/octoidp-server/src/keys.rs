//! Signing key loading.

use std::path::Path;

use anyhow::Context;
use octoidp_auth::config::SigningOptions;
use octoidp_auth::token::SigningKeyPair;

/// Reads the configured PEM key pair.
///
/// Returns `None` when no private key path is set; the provider then
/// generates an ephemeral key. The key id defaults to the private key's
/// file stem.
///
/// # Errors
///
/// Returns an error if a file cannot be read or does not hold a valid key.
pub fn load_signing_key(options: &SigningOptions) -> anyhow::Result<Option<SigningKeyPair>> {
    let Some(private_path) = &options.private_key_path else {
        return Ok(None);
    };
    let private_pem = read_pem(private_path)?;

    let public_pem = match &options.public_key_path {
        Some(path) => read_pem(path)?,
        None if options.algorithm.is_rsa() => {
            anyhow::bail!("signing.public_key_path is required for {}", options.algorithm)
        }
        None => String::new(),
    };

    let kid = options.key_id.clone().unwrap_or_else(|| {
        private_path
            .file_stem()
            .map_or_else(|| "signing".to_string(), |stem| stem.to_string_lossy().into_owned())
    });

    let key = SigningKeyPair::from_pem(kid, options.algorithm, &private_pem, &public_pem)
        .with_context(|| format!("invalid signing key {}", private_path.display()))?;
    tracing::info!(kid = %key.kid, algorithm = %options.algorithm, "Signing key loaded");
    Ok(Some(key))
}

fn read_pem(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
