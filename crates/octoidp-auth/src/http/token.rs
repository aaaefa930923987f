//! Token endpoint handler.
//!
//! ```text
//! POST /connect/token
//! Content-Type: application/x-www-form-urlencoded
//! Authorization: Basic <base64(client_id:client_secret)>
//!
//! grant_type=authorization_code
//! &code=SplxlOBeZQQYbYS6WxSbIA
//! &redirect_uri=https://app.example.com/cb
//! &code_verifier=dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk
//! ```

use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use super::error::no_store_headers;
use super::{IdpState, authorization_header};
use crate::error::AuthError;
use crate::types::RequestParameters;

/// Handles `POST /connect/token`.
pub async fn token_handler(
    State(state): State<IdpState>,
    headers: HeaderMap,
    Form(parameters): Form<RequestParameters>,
) -> Response {
    let (cancel, _guard) = state.request_token();
    let provider = &state.provider;

    let request = match provider
        .token_request_validator
        .validate(authorization_header(&headers), &parameters, &cancel)
        .await
    {
        Ok(request) => request,
        Err(err) => return token_error(&state, err),
    };

    match provider.token_responses.generate(&request, &cancel).await {
        Ok(response) => {
            info!(
                client_id = %request.client.client_id,
                grant_type = %request.grant_type,
                "Token issued successfully"
            );
            (StatusCode::OK, no_store_headers(), Json(response)).into_response()
        }
        Err(err) => token_error(&state, err),
    }
}

fn token_error(state: &IdpState, err: AuthError) -> Response {
    if err.is_server_error() {
        state.provider.events.unhandled_error(&err);
    }
    warn!(error = %err, "Token request failed");
    err.into_response()
}
