//! HTTP endpoints of the identity provider.
//!
//! # Available Handlers
//!
//! - [`discovery`] - `/.well-known/openid-configuration` and `/.well-known/jwks`
//! - [`authorize`] - authorize endpoint (GET and POST)
//! - [`token`] - token endpoint
//! - [`introspect`] - token introspection (RFC 7662)
//! - [`revocation`] - token revocation (RFC 7009)
//! - [`userinfo`] - OpenID Connect UserInfo
//!
//! Endpoints switched off in [`EndpointOptions`](crate::config::EndpointOptions)
//! are not routed and answer 404.

pub mod authorize;
pub mod discovery;
pub mod error;
pub mod introspect;
pub mod revocation;
pub mod templates;
pub mod token;
pub mod userinfo;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::http::{HeaderMap, header};
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;

use crate::AuthResult;
use crate::provider::IdentityProvider;
use crate::types::{RequestParameters, Subject};

pub use error::{ErrorResponse, status_code};

/// Endpoint paths.
pub mod paths {
    pub const DISCOVERY: &str = "/.well-known/openid-configuration";
    pub const JWKS: &str = "/.well-known/jwks";
    pub const AUTHORIZE: &str = crate::grants::AUTHORIZE_PATH;
    pub const TOKEN: &str = "/connect/token";
    pub const USERINFO: &str = "/connect/userinfo";
    pub const INTROSPECT: &str = "/connect/introspect";
    pub const REVOCATION: &str = "/connect/revocation";
}

// =============================================================================
// Subject resolution
// =============================================================================

/// What the host knows about the user of an authorize request.
#[derive(Debug, Clone, Default)]
pub struct AuthorizeSession {
    /// The logged-in user, if any.
    pub subject: Option<Subject>,
    /// Scopes the user granted on the consent page for this request.
    pub consented_scopes: Option<Vec<String>>,
}

/// Bridges the host's login session to the authorize endpoint.
///
/// The identity provider renders no login or consent UI itself. The host
/// signs users in on `login_url`, records consent on `consent_url`, and
/// resolves both here when the browser comes back to the authorize endpoint.
#[async_trait]
pub trait SubjectResolver: Send + Sync {
    async fn resolve(
        &self,
        headers: &HeaderMap,
        parameters: &RequestParameters,
    ) -> AuthResult<AuthorizeSession>;
}

/// Never knows a user, so every interactive request goes to the login page.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousSubjectResolver;

#[async_trait]
impl SubjectResolver for AnonymousSubjectResolver {
    async fn resolve(
        &self,
        _headers: &HeaderMap,
        _parameters: &RequestParameters,
    ) -> AuthResult<AuthorizeSession> {
        Ok(AuthorizeSession::default())
    }
}

// =============================================================================
// State and router
// =============================================================================

/// Shared state of every endpoint.
#[derive(Clone)]
pub struct IdpState {
    pub provider: Arc<IdentityProvider>,
    pub subjects: Arc<dyn SubjectResolver>,
    /// Parent of every per-request cancellation token.
    pub shutdown: CancellationToken,
}

impl IdpState {
    #[must_use]
    pub fn new(
        provider: Arc<IdentityProvider>,
        subjects: Arc<dyn SubjectResolver>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            subjects,
            shutdown,
        }
    }

    /// A token cancelled on shutdown or when the returned guard is dropped.
    ///
    /// Handlers keep the guard alive for the duration of the request, so a
    /// client disconnect (which drops the handler future) cancels the work.
    #[must_use]
    pub fn request_token(&self) -> (CancellationToken, tokio_util::sync::DropGuard) {
        let token = self.shutdown.child_token();
        let guard = token.clone().drop_guard();
        (token, guard)
    }
}

impl std::fmt::Debug for IdpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdpState")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// Routes every enabled endpoint.
pub fn router(state: IdpState) -> Router {
    let endpoints = state.provider.options.endpoints.clone();
    let mut router = Router::new();

    if endpoints.enable_discovery_endpoint {
        router = router
            .route(paths::DISCOVERY, get(discovery::discovery_handler))
            .route(paths::JWKS, get(discovery::jwks_handler));
    }
    if endpoints.enable_authorize_endpoint {
        router = router.route(
            paths::AUTHORIZE,
            get(authorize::authorize_handler).post(authorize::authorize_handler),
        );
    }
    if endpoints.enable_token_endpoint {
        router = router.route(paths::TOKEN, post(token::token_handler));
    }
    if endpoints.enable_userinfo_endpoint {
        router = router.route(
            paths::USERINFO,
            get(userinfo::userinfo_get_handler).post(userinfo::userinfo_post_handler),
        );
    }
    if endpoints.enable_introspection_endpoint {
        router = router.route(paths::INTROSPECT, post(introspect::introspect_handler));
    }
    if endpoints.enable_token_revocation_endpoint {
        router = router.route(paths::REVOCATION, post(revocation::revocation_handler));
    }

    router.with_state(state)
}

/// The raw `Authorization` header, if it is valid UTF-8.
pub(crate) fn authorization_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdpOptions;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn state(options: IdpOptions) -> IdpState {
        let provider = IdentityProvider::builder(options).build().unwrap();
        IdpState::new(
            Arc::new(provider),
            Arc::new(AnonymousSubjectResolver),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_disabled_endpoint_is_not_found() {
        let mut options = IdpOptions::default();
        options.endpoints.enable_discovery_endpoint = false;
        let app = router(state(options));

        let response = app
            .oneshot(
                Request::builder()
                    .uri(paths::DISCOVERY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_enabled_endpoint_is_routed() {
        let app = router(state(IdpOptions::default()));
        let response = app
            .oneshot(Request::builder().uri(paths::JWKS).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_request_token_follows_shutdown() {
        let state = state(IdpOptions::default());
        let (token, guard) = state.request_token();
        assert!(!token.is_cancelled());
        state.shutdown.cancel();
        assert!(token.is_cancelled());
        drop(guard);
    }

    #[test]
    fn test_dropped_guard_cancels_request() {
        let state = state(IdpOptions::default());
        let (token, guard) = state.request_token();
        drop(guard);
        assert!(token.is_cancelled());
        assert!(!state.shutdown.is_cancelled());
    }
}
