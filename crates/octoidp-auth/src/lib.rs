//! # octoidp-auth
//!
//! OpenID Connect / OAuth 2.0 protocol engine of OctoIdP.
//!
//! This crate provides:
//! - Authorize and token request validation, including PKCE
//! - Identity, access (JWT or reference) and refresh token issuance
//! - Access and identity token validation, introspection and revocation
//! - Storage and collaborator traits with in-memory implementations
//! - Single-flight caching decorators and structured protocol events
//! - Axum handlers for the protocol endpoints
//!
//! ## Overview
//!
//! Every engine operation is async and takes a
//! [`CancellationToken`](tokio_util::sync::CancellationToken) that is raced
//! against store, user service and signing calls. Time is read from an
//! injected [`Clock`](clock::Clock). Failures are typed [`AuthError`] values
//! that map onto the OAuth 2.0 error codes.
//!
//! ## Modules
//!
//! - [`config`] - Identity provider options
//! - [`types`] - Clients, scopes, tokens, codes and subjects
//! - [`validation`] - Authorize, token, PKCE, scope and client validation
//! - [`token`] - Token factory, signing, validation, introspection, revocation
//! - [`grants`] - Authorize interaction and response generation
//! - [`storage`] - Store traits, in-memory stores and caching decorators
//! - [`services`] - User, consent, claims and custom grant collaborators
//! - [`events`] - Protocol events with lazily computed details
//! - [`provider`] - Assembly of all of the above
//! - [`http`] - Axum HTTP handlers for the endpoints

pub mod cache;
pub mod cancellation;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod grants;
pub mod http;
pub mod provider;
pub mod services;
pub mod storage;
pub mod token;
pub mod types;
pub mod validation;

pub use config::{ConfigError, IdpOptions};
pub use error::{AuthError, ErrorCategory};
pub use provider::{IdentityProvider, IdentityProviderBuilder};

/// Type alias for protocol results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octoidp_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
    pub use crate::config::{ConfigError, IdpOptions};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::events::{Event, EventService, EventSink, TracingEventSink};
    pub use crate::grants::{InteractionOutcome, TokenResponse};
    pub use crate::http::{AnonymousSubjectResolver, AuthorizeSession, IdpState, SubjectResolver, router};
    pub use crate::provider::{IdentityProvider, IdentityProviderBuilder};
    pub use crate::services::{
        AggregateClaimsFilter, ClaimsFilter, CustomGrantValidator, InMemoryUser,
        InMemoryUserService, UserService,
    };
    pub use crate::storage::{
        ClientStore, ConsentStore, HandleStore, InMemoryClientStore, InMemoryHandleStore,
        InMemoryScopeStore, ScopeStore,
    };
    pub use crate::token::{SigningAlgorithm, SigningKeyPair, TokenValidationResult};
    pub use crate::types::{
        Client, Flow, GrantType, RequestParameters, Scope, Secret, StandardScopes, Subject,
    };
}
