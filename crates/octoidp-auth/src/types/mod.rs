//! Data model of the identity provider.

mod authorization_code;
mod claims;
mod client;
mod consent;
mod parameters;
mod scope;
mod secret;
mod token;

use time::{Duration, OffsetDateTime};

pub use authorization_code::{AuthorizationCode, CodeBinding};
pub use claims::{Claim, LOCAL_IDENTITY_PROVIDER, Subject, claim_types, claims_to_object};
pub use client::{
    AccessTokenType, Client, ClientValidationError, Flow, GrantType, TokenExpiration, TokenUsage,
};
pub use consent::Consent;
pub use parameters::{RequestParameters, SENSITIVE_PARAMETERS};
pub use scope::{Scope, ScopeClaim, ScopeType, StandardScopes, scope_names};
pub use secret::{Secret, any_secret_matches};
pub use token::{ConfirmationKey, RefreshToken, Token, TokenKind};

/// `created_at + lifetime` seconds, saturating at the end of representable time.
pub(crate) fn expires_after(created_at: OffsetDateTime, lifetime: u64) -> OffsetDateTime {
    let seconds = i64::try_from(lifetime).unwrap_or(i64::MAX);
    created_at.saturating_add(Duration::seconds(seconds))
}
