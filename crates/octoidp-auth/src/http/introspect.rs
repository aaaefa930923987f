//! Token introspection endpoint (RFC 7662).
//!
//! The caller is a resource scope authenticating with one of its scope
//! secrets, via HTTP Basic or `client_id`/`client_secret` form fields.

use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::error::no_store_headers;
use super::{IdpState, authorization_header};
use crate::error::AuthError;
use crate::types::RequestParameters;

/// Handles `POST /connect/introspect`.
pub async fn introspect_handler(
    State(state): State<IdpState>,
    headers: HeaderMap,
    Form(parameters): Form<RequestParameters>,
) -> Response {
    let (cancel, _guard) = state.request_token();
    let provider = &state.provider;

    let scope = match provider
        .scope_secrets
        .authenticate(authorization_header(&headers), &parameters, &cancel)
        .await
    {
        Ok(scope) => scope,
        Err(err) => {
            warn!(error = %err, "Introspection caller authentication failed");
            return err.into_response();
        }
    };

    let Some(token) = parameters.get("token") else {
        return AuthError::invalid_request("token is missing").into_response();
    };

    match provider.introspection.introspect(&scope, token, &cancel).await {
        Ok(response) => {
            debug!(scope = %scope.name, active = response.active, "Introspection answered");
            (StatusCode::OK, no_store_headers(), Json(response)).into_response()
        }
        Err(err) => {
            provider.events.unhandled_error(&err);
            err.into_response()
        }
    }
}
