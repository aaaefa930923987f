//! Authorize endpoint processing after validation.
//!
//! ```text
//! ValidatedAuthorizeRequest
//!     │
//!     ├─► no subject / prompt=login / max_age exceeded
//!     │       ├─► prompt=none → login_required
//!     │       └─► Login { redirect_url }
//!     ├─► consent required (prompt=consent forces it)
//!     │       ├─► prompt=none → consent_required
//!     │       └─► Consent { redirect_url }
//!     └─► Authorized → AuthorizeResponseGenerator → redirect / form_post
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::form_urlencoded;

use crate::AuthResult;
use crate::cancellation::cancellable;
use crate::clock::SharedClock;
use crate::config::AuthenticationOptions;
use crate::crypto::generate_handle;
use crate::error::AuthError;
use crate::events::EventService;
use crate::services::ConsentService;
use crate::storage::AuthorizationCodeStore;
use crate::token::{TokenCreationRequest, TokenFactory, TokenSigningService};
use crate::types::{AuthorizationCode, CodeBinding};
use crate::validation::{
    AuthorizeRequestError, Prompt, ResponseMode, ValidatedAuthorizeRequest, ValidatedScopes,
};

/// Path of the authorize endpoint, used for interaction return URLs.
pub const AUTHORIZE_PATH: &str = "/connect/authorize";

// =============================================================================
// Interaction
// =============================================================================

/// What the authorize endpoint does next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionOutcome {
    /// Issue the response.
    Authorized { consent_shown: bool },
    /// Send the user to the host's login page.
    Login { redirect_url: String },
    /// Send the user to the host's consent page.
    Consent { redirect_url: String },
}

/// Decides whether login or consent must happen before a response is issued.
#[derive(Clone)]
pub struct AuthorizeInteraction {
    authentication: AuthenticationOptions,
    consent: ConsentService,
    clock: SharedClock,
}

impl AuthorizeInteraction {
    #[must_use]
    pub fn new(
        authentication: AuthenticationOptions,
        consent: ConsentService,
        clock: SharedClock,
    ) -> Self {
        Self {
            authentication,
            consent,
            clock,
        }
    }

    /// Runs login and consent checks.
    ///
    /// `consented_scopes` is the decision the host's consent page recorded
    /// for this request, if any. The request's scopes are narrowed to it,
    /// required scopes are always kept.
    ///
    /// # Errors
    ///
    /// `login_required` / `consent_required` under `prompt=none`,
    /// `access_denied` when the user granted nothing, and store failures;
    /// all delivered to the validated redirect URI.
    pub async fn process(
        &self,
        request: &mut ValidatedAuthorizeRequest,
        consented_scopes: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Result<InteractionOutcome, AuthorizeRequestError> {
        let delivery = request.error_delivery();
        let fail = |error: AuthError| AuthorizeRequestError::redirect(error, delivery.clone());

        let Some(subject_id) = self.authenticated_subject(request) else {
            if request.has_prompt(Prompt::None) {
                return Err(fail(AuthError::LoginRequired));
            }
            tracing::debug!(client_id = %request.client.client_id, "Login required");
            return Ok(InteractionOutcome::Login {
                redirect_url: interaction_url(&self.authentication.login_url, request),
            });
        };

        if let Some(granted) = consented_scopes {
            let kept: Vec<_> = request
                .scopes
                .scopes()
                .iter()
                .filter(|scope| scope.required || granted.contains(&scope.name))
                .cloned()
                .collect();
            if kept.is_empty() {
                return Err(fail(AuthError::access_denied("The user denied the request")));
            }
            request.scopes = ValidatedScopes::new(kept);
            let names = request.scope_names();
            cancellable(
                cancel,
                self.consent
                    .update_consent(&request.client, &subject_id, &names),
            )
            .await
            .map_err(fail)?;
            return Ok(InteractionOutcome::Authorized {
                consent_shown: true,
            });
        }

        let required = request.has_prompt(Prompt::Consent)
            || cancellable(
                cancel,
                self.consent.requires_consent(
                    &request.client,
                    &subject_id,
                    &request.scope_names(),
                ),
            )
            .await
            .map_err(fail)?;
        if !required {
            return Ok(InteractionOutcome::Authorized {
                consent_shown: false,
            });
        }
        if request.has_prompt(Prompt::None) {
            return Err(fail(AuthError::ConsentRequired));
        }
        tracing::debug!(client_id = %request.client.client_id, sub = %subject_id, "Consent required");
        Ok(InteractionOutcome::Consent {
            redirect_url: interaction_url(&self.authentication.consent_url, request),
        })
    }

    /// The subject, unless a (re-)login is required.
    fn authenticated_subject(&self, request: &ValidatedAuthorizeRequest) -> Option<String> {
        let subject = request.subject.as_ref()?;
        if request.has_prompt(Prompt::Login) {
            return None;
        }
        if let Some(max_age) = request.max_age {
            let age = (self.clock.now() - subject.auth_time).whole_seconds();
            if age > i64::try_from(max_age).unwrap_or(i64::MAX) {
                tracing::debug!(sub = %subject.subject_id, age, max_age, "Authentication older than max_age");
                return None;
            }
        }
        Some(subject.subject_id.clone())
    }
}

impl std::fmt::Debug for AuthorizeInteraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizeInteraction")
            .field("authentication", &self.authentication)
            .finish_non_exhaustive()
    }
}

/// `{page}?returnUrl=<authorize request without prompt>`.
fn interaction_url(page: &str, request: &ValidatedAuthorizeRequest) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(request.raw.iter().filter(|(name, _)| *name != "prompt"))
        .finish();
    let return_url = format!("{AUTHORIZE_PATH}?{query}");
    let separator = if page.contains('?') { '&' } else { '?' };
    let encoded: String = form_urlencoded::byte_serialize(return_url.as_bytes()).collect();
    format!("{page}{separator}returnUrl={encoded}")
}

// =============================================================================
// Response
// =============================================================================

/// The protocol parameters of a successful authorize response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeResponse {
    pub redirect_uri: String,
    pub response_mode: ResponseMode,
    pub code: Option<String>,
    pub id_token: Option<String>,
    pub access_token: Option<String>,
    /// Seconds, present with `access_token`.
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub state: Option<String>,
}

impl AuthorizeResponse {
    /// Response parameters in wire order.
    #[must_use]
    pub fn parameters(&self) -> Vec<(&'static str, String)> {
        let mut parameters = Vec::new();
        if let Some(code) = &self.code {
            parameters.push(("code", code.clone()));
        }
        if let Some(id_token) = &self.id_token {
            parameters.push(("id_token", id_token.clone()));
        }
        if let Some(access_token) = &self.access_token {
            parameters.push(("access_token", access_token.clone()));
            parameters.push(("token_type", "Bearer".to_string()));
        }
        if let Some(expires_in) = self.expires_in {
            parameters.push(("expires_in", expires_in.to_string()));
        }
        if let Some(scope) = &self.scope {
            parameters.push(("scope", scope.clone()));
        }
        if let Some(state) = &self.state {
            parameters.push(("state", state.clone()));
        }
        parameters
    }

    /// # Errors
    ///
    /// See [`redirect_url`].
    pub fn to_redirect_url(&self) -> AuthResult<String> {
        redirect_url(&self.redirect_uri, self.response_mode, &self.parameters())
    }
}

/// `error`, `error_description` and `state` of an error redirect.
#[must_use]
pub fn error_parameters(error: &AuthError, state: Option<&str>) -> Vec<(&'static str, String)> {
    let mut parameters = vec![("error", error.oauth_error_code().to_string())];
    if let Some(description) = error.public_description() {
        parameters.push(("error_description", description));
    }
    if let Some(state) = state {
        parameters.push(("state", state.to_string()));
    }
    parameters
}

/// Appends `parameters` to the query or fragment of `redirect_uri`.
///
/// # Errors
///
/// Returns `AuthError::Internal` for an unparseable URI or
/// [`ResponseMode::FormPost`], which is rendered rather than redirected.
pub fn redirect_url(
    redirect_uri: &str,
    mode: ResponseMode,
    parameters: &[(&'static str, String)],
) -> AuthResult<String> {
    let mut url = url::Url::parse(redirect_uri)
        .map_err(|err| AuthError::internal(format!("invalid redirect_uri: {err}")))?;
    match mode {
        ResponseMode::Query => {
            url.query_pairs_mut()
                .extend_pairs(parameters.iter().map(|(name, value)| (*name, value.as_str())));
        }
        ResponseMode::Fragment => {
            let fragment = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(parameters.iter().map(|(name, value)| (*name, value.as_str())))
                .finish();
            url.set_fragment(Some(&fragment));
        }
        ResponseMode::FormPost => {
            return Err(AuthError::internal("form_post responses cannot be redirected"));
        }
    }
    Ok(url.to_string())
}

// =============================================================================
// Generator
// =============================================================================

/// Issues codes and tokens for authorized requests.
#[derive(Clone)]
pub struct AuthorizeResponseGenerator {
    codes: Arc<AuthorizationCodeStore>,
    factory: TokenFactory,
    signing: TokenSigningService,
    events: EventService,
    clock: SharedClock,
}

impl AuthorizeResponseGenerator {
    #[must_use]
    pub fn new(
        codes: Arc<AuthorizationCodeStore>,
        factory: TokenFactory,
        signing: TokenSigningService,
        events: EventService,
        clock: SharedClock,
    ) -> Self {
        Self {
            codes,
            factory,
            signing,
            events,
            clock,
        }
    }

    /// Builds the response for `request`.
    ///
    /// The code (if any) is created first, then the access token, then the
    /// id_token carrying `c_hash` / `at_hash` of both.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` for a request without a subject, and
    /// propagates store, claims and signing failures.
    pub async fn generate(
        &self,
        request: &ValidatedAuthorizeRequest,
        consent_shown: bool,
        cancel: &CancellationToken,
    ) -> AuthResult<AuthorizeResponse> {
        let subject = request
            .subject
            .as_ref()
            .ok_or_else(|| AuthError::internal("authorize response without subject"))?;
        let client = &request.client;
        let response_type = request.response_type;

        let code = if response_type.includes_code() {
            let binding = CodeBinding {
                client_id: client.client_id.clone(),
                subject: subject.clone(),
                redirect_uri: request.redirect_uri.clone(),
                requested_scopes: request.scope_names(),
                is_open_id: request.scopes.contains_open_id(),
                nonce: request.nonce.clone(),
                proof_key: request.proof_key.clone(),
                was_consent_shown: consent_shown,
            };
            let code = AuthorizationCode::issue(
                binding,
                self.clock.now(),
                client.authorization_code_lifetime,
            );
            let handle = generate_handle();
            cancellable(cancel, self.codes.store(&handle, code)).await?;

            tracing::debug!(client_id = %client.client_id, sub = %subject.subject_id, "Authorization code issued");
            self.events.authorization_code_issued(
                &client.client_id,
                &subject.subject_id,
                &request.scope_names(),
            );
            Some(handle)
        } else {
            None
        };

        let base = TokenCreationRequest::new(client, request.scopes.scopes()).with_subject(subject);

        let (access_token, expires_in) = if response_type.includes_access_token() {
            let token = self.factory.create_access_token(&base, cancel).await?;
            let issued = self.signing.issue(&token, cancel).await?;
            (Some(issued), Some(token.lifetime))
        } else {
            (None, None)
        };

        let id_token = if response_type.includes_identity_token() {
            let creation = TokenCreationRequest {
                nonce: request.nonce.as_deref(),
                authorization_code: code.as_deref(),
                access_token: access_token.as_deref(),
                include_all_identity_claims: !response_type.includes_code()
                    && !response_type.includes_access_token(),
                ..base
            };
            let token = self.factory.create_identity_token(&creation, cancel).await?;
            Some(self.signing.issue(&token, cancel).await?)
        } else {
            None
        };

        let scope = access_token.as_ref().map(|_| request.scope_names().join(" "));
        Ok(AuthorizeResponse {
            redirect_uri: request.redirect_uri.clone(),
            response_mode: request.response_mode,
            code,
            id_token,
            access_token,
            expires_in,
            scope,
            state: request.state.clone(),
        })
    }
}

impl std::fmt::Debug for AuthorizeResponseGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizeResponseGenerator")
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}
