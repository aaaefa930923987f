//! Discovery document and JWK set.
//!
//! Endpoint URLs are built from `public_origin` (falling back to the issuer)
//! and only name endpoints that are enabled.

use axum::{
    Json,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{IdpState, paths};
use crate::AuthResult;
use crate::cancellation::cancellable;
use crate::provider::IdentityProvider;
use crate::validation::CodeChallengeMethod;

const RESPONSE_TYPES: &[&str] = &[
    "code",
    "id_token",
    "id_token token",
    "code id_token",
    "code token",
    "code id_token token",
];

const RESPONSE_MODES: &[&str] = &["form_post", "query", "fragment"];

const BUILT_IN_GRANTS: &[&str] = &[
    "authorization_code",
    "client_credentials",
    "refresh_token",
    "implicit",
    "password",
];

/// OpenID Connect Discovery 1.0 provider metadata.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub response_modes_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

impl DiscoveryDocument {
    /// # Errors
    ///
    /// Propagates scope store failures.
    pub async fn build(provider: &IdentityProvider, cancel: &CancellationToken) -> AuthResult<Self> {
        let options = &provider.options;
        let origin = options.origin();
        let endpoint = |enabled: bool, path: &str| enabled.then(|| format!("{origin}{path}"));
        let endpoints = &options.endpoints;

        let scopes = cancellable(cancel, provider.scopes.get_scopes(true)).await?;
        let scopes_supported = scopes
            .iter()
            .filter(|scope| scope.enabled)
            .map(|scope| scope.name.clone())
            .collect();
        let mut claims_supported: Vec<String> = Vec::new();
        for name in scopes
            .iter()
            .filter(|scope| scope.enabled && scope.is_identity())
            .flat_map(|scope| scope.claim_names())
        {
            if !claims_supported.iter().any(|claim| claim == name) {
                claims_supported.push(name.to_string());
            }
        }

        let mut grant_types_supported: Vec<String> =
            BUILT_IN_GRANTS.iter().map(ToString::to_string).collect();
        grant_types_supported.extend(provider.custom_grant_types.iter().cloned());

        Ok(Self {
            issuer: options.issuer().to_string(),
            jwks_uri: endpoint(endpoints.enable_discovery_endpoint, paths::JWKS),
            authorization_endpoint: endpoint(endpoints.enable_authorize_endpoint, paths::AUTHORIZE),
            token_endpoint: endpoint(endpoints.enable_token_endpoint, paths::TOKEN),
            userinfo_endpoint: endpoint(endpoints.enable_userinfo_endpoint, paths::USERINFO),
            introspection_endpoint: endpoint(
                endpoints.enable_introspection_endpoint,
                paths::INTROSPECT,
            ),
            revocation_endpoint: endpoint(
                endpoints.enable_token_revocation_endpoint,
                paths::REVOCATION,
            ),
            scopes_supported,
            claims_supported,
            response_types_supported: to_strings(RESPONSE_TYPES),
            response_modes_supported: to_strings(RESPONSE_MODES),
            grant_types_supported,
            subject_types_supported: vec!["public".to_string()],
            id_token_signing_alg_values_supported: vec![
                provider.jwt.algorithm().as_str().to_string(),
            ],
            code_challenge_methods_supported: vec![
                CodeChallengeMethod::Plain.as_str().to_string(),
                CodeChallengeMethod::S256.as_str().to_string(),
            ],
            token_endpoint_auth_methods_supported: to_strings(&[
                "client_secret_basic",
                "client_secret_post",
            ]),
        })
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

/// Handler for `GET /.well-known/openid-configuration`.
pub async fn discovery_handler(State(state): State<IdpState>) -> Response {
    let (cancel, _guard) = state.request_token();
    match DiscoveryDocument::build(&state.provider, &cancel).await {
        Ok(document) => ([(header::CONTENT_TYPE, "application/json")], Json(document)).into_response(),
        Err(err) => {
            state.provider.events.unhandled_error(&err);
            err.into_response()
        }
    }
}

/// Handler for `GET /.well-known/jwks`.
pub async fn jwks_handler(State(state): State<IdpState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        Json(state.provider.jwt.jwks()),
    )
}
