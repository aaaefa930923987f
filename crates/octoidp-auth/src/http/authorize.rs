//! Authorize endpoint handler.
//!
//! ```text
//! GET /connect/authorize?client_id=app&redirect_uri=https://app.example.com/cb
//!     &response_type=code&scope=openid%20api&state=xyz
//!     &code_challenge=E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM&code_challenge_method=S256
//!
//! HTTP/1.1 302 Found
//! Location: https://app.example.com/cb?code=SplxlOBeZQQYbYS6WxSbIA&state=xyz
//! ```
//!
//! Errors go back to the client only once its redirect URI is validated.
//! Before that, and for flows that would leak tokens, a local error page is
//! rendered with status 200.

use axum::{
    Form,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use tracing::{debug, info, warn};

use super::IdpState;
use super::error::no_store_headers;
use super::templates::{render_error_page, render_form_post};
use crate::cancellation::cancellable;
use crate::grants::{AuthorizeResponse, InteractionOutcome, error_parameters, redirect_url};
use crate::types::RequestParameters;
use crate::validation::{AuthorizeRequestError, ErrorDelivery, ResponseMode};

/// Handles `GET` (query) and `POST` (form body) authorize requests.
pub async fn authorize_handler(
    State(state): State<IdpState>,
    headers: HeaderMap,
    Form(parameters): Form<RequestParameters>,
) -> Response {
    let (cancel, _guard) = state.request_token();
    let provider = &state.provider;

    let session = match cancellable(&cancel, state.subjects.resolve(&headers, &parameters)).await
    {
        Ok(session) => session,
        Err(err) => {
            warn!(error = %err, "Subject resolution failed");
            return error_response(&state, AuthorizeRequestError::local(err));
        }
    };

    let mut request = match provider
        .authorize_validator
        .validate(&parameters, session.subject.as_ref(), &cancel)
        .await
    {
        Ok(request) => request,
        Err(err) => return error_response(&state, err),
    };

    let outcome = match provider
        .interaction
        .process(&mut request, session.consented_scopes.as_deref(), &cancel)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => return error_response(&state, err),
    };

    match outcome {
        InteractionOutcome::Login { redirect_url } | InteractionOutcome::Consent { redirect_url } => {
            debug!(client_id = %request.client.client_id, to = %redirect_url, "Interaction required");
            found(&redirect_url)
        }
        InteractionOutcome::Authorized { consent_shown } => {
            match provider
                .authorize_responses
                .generate(&request, consent_shown, &cancel)
                .await
            {
                Ok(response) => {
                    info!(
                        client_id = %request.client.client_id,
                        response_type = %request.response_type,
                        "Authorize response issued"
                    );
                    success_response(&state, &response)
                }
                Err(err) => error_response(
                    &state,
                    AuthorizeRequestError::redirect(err, request.error_delivery()),
                ),
            }
        }
    }
}

fn success_response(state: &IdpState, response: &AuthorizeResponse) -> Response {
    if response.response_mode == ResponseMode::FormPost {
        return form_post(state, &response.redirect_uri, &response.parameters());
    }
    match response.to_redirect_url() {
        Ok(url) => found(&url),
        Err(err) => error_response(state, AuthorizeRequestError::local(err)),
    }
}

/// Delivers an authorize error as its [`ErrorDelivery`] demands.
fn error_response(state: &IdpState, err: AuthorizeRequestError) -> Response {
    let site_name = &state.provider.options.site_name;
    if err.error.is_server_error() {
        state.provider.events.unhandled_error(&err.error);
    }

    match &err.delivery {
        ErrorDelivery::LocalPage => {
            warn!(error = %err.error, "Authorize error shown locally");
            let status = if err.error.is_server_error() {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            };
            let description = err.error.public_description().unwrap_or_default();
            let page = render_error_page(site_name, err.error.oauth_error_code(), &description);
            (status, no_store_headers(), Html(page)).into_response()
        }
        ErrorDelivery::Redirect {
            redirect_uri,
            response_mode,
            state: client_state,
        } => {
            debug!(error = %err.error, redirect_uri = %redirect_uri, "Authorize error redirected");
            let parameters = error_parameters(&err.error, client_state.as_deref());
            if *response_mode == ResponseMode::FormPost {
                return form_post(state, redirect_uri, &parameters);
            }
            match redirect_url(redirect_uri, *response_mode, &parameters) {
                Ok(url) => found(&url),
                Err(redirect_err) => {
                    error_response(state, AuthorizeRequestError::local(redirect_err))
                }
            }
        }
    }
}

fn form_post(state: &IdpState, redirect_uri: &str, parameters: &[(&'static str, String)]) -> Response {
    let page = render_form_post(&state.provider.options.site_name, redirect_uri, parameters);
    (StatusCode::OK, no_store_headers(), Html(page)).into_response()
}

fn found(location: &str) -> Response {
    let mut headers = no_store_headers();
    match HeaderValue::from_str(location) {
        Ok(value) => {
            headers.insert(header::LOCATION, value);
            (StatusCode::FOUND, headers).into_response()
        }
        Err(_) => {
            warn!("Redirect location is not a valid header value");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
