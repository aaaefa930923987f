//! Token issuance, signing and validation.
//!
//! - [`factory`] builds identity and access tokens from a validated request
//! - [`signing`] turns tokens into JWTs (or reference handles) and publishes the JWKS
//! - [`refresh`] applies refresh token usage and expiration policies
//! - [`validator`] validates presented access and identity tokens
//! - [`introspection`] and [`revocation`] back the RFC 7662 / RFC 7009 endpoints

pub mod factory;
pub mod introspection;
pub mod refresh;
pub mod revocation;
pub mod signing;
pub mod validator;

pub use factory::{TokenCreationRequest, TokenFactory, TokenSigningService};
pub use introspection::{IntrospectionResponse, IntrospectionService};
pub use refresh::RefreshTokenService;
pub use revocation::{RevocationService, TokenTypeHint};
pub use signing::{
    Jwk, Jwks, JwtError, JwtExpectations, JwtService, SigningAlgorithm, SigningKeyPair,
};
pub use validator::{TokenValidationResult, TokenValidator};
