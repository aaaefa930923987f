//! Request validation for the authorize and token endpoints.

pub mod authorize;
pub mod client_auth;
pub mod pkce;
pub mod scope;
pub mod token_request;

pub use authorize::{
    AuthorizeRequestError, AuthorizeRequestValidator, Display, ErrorDelivery, Prompt,
    ResponseMode, ResponseType, ValidatedAuthorizeRequest,
};
pub use client_auth::{
    ClientAuthenticator, CredentialSource, ParsedSecret, ScopeSecretValidator,
    parse_client_credentials,
};
pub use pkce::{
    CodeChallengeMethod, PkceError, PkceValidator, ProofKeyChallenge, generate_code_verifier,
    s256_challenge,
};
pub use scope::{ScopeValidator, ValidatedScopes, parse_scopes};
pub use token_request::{TokenRequestValidator, ValidatedTokenRequest};
