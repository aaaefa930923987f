//! JSON error responses of the protocol endpoints.
//!
//! | error                                   | status |
//! |-----------------------------------------|--------|
//! | `invalid_client`                        | 401    |
//! | `insufficient_scope`                    | 403    |
//! | `invalid_token`, `expired_token`        | 401    |
//! | `server_error`                          | 500    |
//! | everything else                         | 400    |

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::AuthError;

/// OAuth 2.0 error body (RFC 6749 §5.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl From<&AuthError> for ErrorResponse {
    fn from(error: &AuthError) -> Self {
        Self {
            error: error.oauth_error_code(),
            error_description: error.public_description(),
        }
    }
}

/// HTTP status for `error`.
#[must_use]
pub fn status_code(error: &AuthError) -> StatusCode {
    match error {
        AuthError::InvalidClient { .. } => StatusCode::UNAUTHORIZED,
        AuthError::InsufficientScope { .. } => StatusCode::FORBIDDEN,
        err if err.is_server_error() => StatusCode::INTERNAL_SERVER_ERROR,
        err if err.is_token_error() => StatusCode::UNAUTHORIZED,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// Headers every token-bearing or error response carries.
pub(crate) fn no_store_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        let body = ErrorResponse::from(&self);

        let mut headers = no_store_headers();
        if self.is_token_error() {
            let challenge = format!("Bearer error=\"{}\"", body.error);
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        (status, headers, Json(body)).into_response()
    }
}
