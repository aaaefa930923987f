//! OpenID Connect UserInfo endpoint.
//!
//! The access token is taken from the `Authorization: Bearer` header, or for
//! `POST` from the `access_token` form field (RFC 6750 §2.2). It must carry
//! the `openid` scope.

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::error::no_store_headers;
use super::{IdpState, authorization_header};
use crate::error::AuthError;
use crate::types::{RequestParameters, scope_names};

/// Handles `GET /connect/userinfo`.
pub async fn userinfo_get_handler(State(state): State<IdpState>, headers: HeaderMap) -> Response {
    userinfo(&state, bearer_token(&headers)).await
}

/// Handles `POST /connect/userinfo`.
pub async fn userinfo_post_handler(
    State(state): State<IdpState>,
    headers: HeaderMap,
    form: Result<Form<RequestParameters>, FormRejection>,
) -> Response {
    let parameters = form.map(|Form(parameters)| parameters).unwrap_or_default();
    let token = bearer_token(&headers).or_else(|| parameters.get("access_token"));
    userinfo(&state, token).await
}

async fn userinfo(state: &IdpState, token: Option<&str>) -> Response {
    let (cancel, _guard) = state.request_token();
    let provider = &state.provider;

    let Some(token) = token else {
        return AuthError::invalid_token("Bearer token required").into_response();
    };

    let validation = match provider
        .token_validator
        .validate_access_token(token, Some(scope_names::OPENID), &cancel)
        .await
    {
        Ok(validation) => validation,
        Err(err) => {
            warn!(error = %err, "UserInfo token rejected");
            return err.into_response();
        }
    };

    match provider.userinfo.generate(&validation, &cancel).await {
        Ok(claims) => {
            debug!(client_id = %validation.client.client_id, "UserInfo answered");
            (StatusCode::OK, no_store_headers(), Json(claims)).into_response()
        }
        Err(err) => {
            if err.is_server_error() {
                provider.events.unhandled_error(&err);
            }
            err.into_response()
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = authorization_header(headers)?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header};

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
