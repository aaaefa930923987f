//! Token revocation endpoint (RFC 7009).
//!
//! ```text
//! POST /connect/revocation
//! Authorization: Basic <base64(client_id:client_secret)>
//!
//! token=45ghiukldjahdnhzdauz&token_type_hint=refresh_token
//! ```
//!
//! Answers 200 with an empty body whether or not a token was removed.

use axum::{
    Form,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::error::no_store_headers;
use super::{IdpState, authorization_header};
use crate::error::AuthError;
use crate::types::RequestParameters;

/// Handles `POST /connect/revocation`.
pub async fn revocation_handler(
    State(state): State<IdpState>,
    headers: HeaderMap,
    Form(parameters): Form<RequestParameters>,
) -> Response {
    let (cancel, _guard) = state.request_token();
    let provider = &state.provider;

    let client = match provider
        .client_authenticator
        .authenticate(authorization_header(&headers), &parameters, &cancel)
        .await
    {
        Ok(client) => client,
        Err(err) => {
            warn!(error = %err, "Revocation client authentication failed");
            return err.into_response();
        }
    };

    let Some(token) = parameters.get("token") else {
        return AuthError::invalid_request("token is missing").into_response();
    };

    match provider
        .revocation
        .revoke(&client, token, parameters.get("token_type_hint"), &cancel)
        .await
    {
        Ok(_) => (StatusCode::OK, no_store_headers()).into_response(),
        Err(err) => {
            if err.is_server_error() {
                provider.events.unhandled_error(&err);
            }
            err.into_response()
        }
    }
}
