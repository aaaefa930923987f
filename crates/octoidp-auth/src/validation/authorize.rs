//! Authorize endpoint request validation.
//!
//! [`AuthorizeRequestValidator::validate`] turns the raw query or form
//! parameters of an authorize request into a [`ValidatedAuthorizeRequest`].
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. `client_id` resolves to an enabled client
//! 2. `redirect_uri` exactly matches a registered URI
//! 3. `response_type` is supported
//! 4. the response type's flow is the client's flow
//! 5. `scope` is present and every scope is allowed
//! 6. PKCE challenge, mandatory for proof-key clients
//! 7. optional parameters and their length limits
//! 8. tokens via the browser are allowed for the client
//!
//! # Error Delivery
//!
//! Until the redirect URI is known to belong to the client, errors must not
//! be sent there. Failures of steps 1 and 2 (and step 8, which would leak
//! tokens) are [`ErrorDelivery::LocalPage`]; every other failure is an
//! [`ErrorDelivery::Redirect`] to the validated redirect URI.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::pkce::{PkceValidator, ProofKeyChallenge};
use super::scope::{ScopeValidator, ValidatedScopes, parse_scopes};
use crate::cancellation::cancellable;
use crate::config::InputLengthRestrictions;
use crate::error::AuthError;
use crate::events::EventService;
use crate::storage::ClientStore;
use crate::types::{Client, Flow, RequestParameters, Subject};

// =============================================================================
// Response Type
// =============================================================================

/// Supported `response_type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    Code,
    IdToken,
    IdTokenToken,
    CodeIdToken,
    CodeToken,
    CodeIdTokenToken,
}

impl ResponseType {
    /// Parses a space-delimited response type. Value order does not matter.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts: Vec<&str> = value.split_whitespace().collect();
        parts.sort_unstable();
        parts.dedup();
        match parts.as_slice() {
            ["code"] => Some(Self::Code),
            ["id_token"] => Some(Self::IdToken),
            ["id_token", "token"] => Some(Self::IdTokenToken),
            ["code", "id_token"] => Some(Self::CodeIdToken),
            ["code", "token"] => Some(Self::CodeToken),
            ["code", "id_token", "token"] => Some(Self::CodeIdTokenToken),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::IdToken => "id_token",
            Self::IdTokenToken => "id_token token",
            Self::CodeIdToken => "code id_token",
            Self::CodeToken => "code token",
            Self::CodeIdTokenToken => "code id_token token",
        }
    }

    /// The flow this response type belongs to, without proof-key distinction.
    #[must_use]
    pub fn flow(&self) -> Flow {
        match self {
            Self::Code => Flow::AuthorizationCode,
            Self::IdToken | Self::IdTokenToken => Flow::Implicit,
            Self::CodeIdToken | Self::CodeToken | Self::CodeIdTokenToken => Flow::Hybrid,
        }
    }

    #[must_use]
    pub fn includes_code(&self) -> bool {
        matches!(self, Self::Code | Self::CodeIdToken | Self::CodeToken | Self::CodeIdTokenToken)
    }

    #[must_use]
    pub fn includes_identity_token(&self) -> bool {
        matches!(
            self,
            Self::IdToken | Self::IdTokenToken | Self::CodeIdToken | Self::CodeIdTokenToken
        )
    }

    #[must_use]
    pub fn includes_access_token(&self) -> bool {
        matches!(self, Self::IdTokenToken | Self::CodeToken | Self::CodeIdTokenToken)
    }

    /// `query` for the code flow, `fragment` for everything returning tokens.
    #[must_use]
    pub fn default_response_mode(&self) -> ResponseMode {
        match self {
            Self::Code => ResponseMode::Query,
            _ => ResponseMode::Fragment,
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How authorize response parameters reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseMode {
    Query,
    Fragment,
    FormPost,
}

impl ResponseMode {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "query" => Some(Self::Query),
            "fragment" => Some(Self::Fragment),
            "form_post" => Some(Self::FormPost),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Fragment => "fragment",
            Self::FormPost => "form_post",
        }
    }
}

// =============================================================================
// Optional parameters
// =============================================================================

/// `prompt` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prompt {
    None,
    Login,
    Consent,
    SelectAccount,
}

impl Prompt {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "login" => Some(Self::Login),
            "consent" => Some(Self::Consent),
            "select_account" => Some(Self::SelectAccount),
            _ => None,
        }
    }
}

/// `display` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Display {
    Page,
    Popup,
    Touch,
    Wap,
}

impl Display {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "page" => Some(Self::Page),
            "popup" => Some(Self::Popup),
            "touch" => Some(Self::Touch),
            "wap" => Some(Self::Wap),
            _ => None,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// A fully validated authorize request.
#[derive(Debug, Clone)]
pub struct ValidatedAuthorizeRequest {
    pub client: Client,
    pub redirect_uri: String,
    pub response_type: ResponseType,
    pub response_mode: ResponseMode,
    pub scopes: ValidatedScopes,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub proof_key: Option<ProofKeyChallenge>,
    pub acr_values: Vec<String>,
    pub prompts: Vec<Prompt>,
    pub display: Option<Display>,
    /// Seconds.
    pub max_age: Option<u64>,
    pub login_hint: Option<String>,
    pub ui_locales: Option<String>,
    pub subject: Option<Subject>,
    pub raw: RequestParameters,
}

impl ValidatedAuthorizeRequest {
    #[must_use]
    pub fn has_prompt(&self, prompt: Prompt) -> bool {
        self.prompts.contains(&prompt)
    }

    #[must_use]
    pub fn scope_names(&self) -> Vec<String> {
        self.scopes.names()
    }

    /// Redirect delivery for errors raised after validation.
    #[must_use]
    pub fn error_delivery(&self) -> ErrorDelivery {
        ErrorDelivery::Redirect {
            redirect_uri: self.redirect_uri.clone(),
            response_mode: self.response_mode,
            state: self.state.clone(),
        }
    }
}

/// Where an authorize error is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDelivery {
    /// Sent to the client's validated redirect URI.
    Redirect {
        redirect_uri: String,
        response_mode: ResponseMode,
        state: Option<String>,
    },
    /// Rendered by the identity provider. The redirect target is not trusted.
    LocalPage,
}

/// A failed authorize request together with its delivery.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct AuthorizeRequestError {
    pub error: AuthError,
    pub delivery: ErrorDelivery,
}

impl AuthorizeRequestError {
    #[must_use]
    pub fn local(error: AuthError) -> Self {
        Self {
            error,
            delivery: ErrorDelivery::LocalPage,
        }
    }

    #[must_use]
    pub fn redirect(error: AuthError, delivery: ErrorDelivery) -> Self {
        Self { error, delivery }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.delivery == ErrorDelivery::LocalPage
    }
}

// =============================================================================
// Validator
// =============================================================================

/// Validates authorize endpoint requests.
#[derive(Clone)]
pub struct AuthorizeRequestValidator {
    clients: Arc<dyn ClientStore>,
    scopes: ScopeValidator,
    pkce: PkceValidator,
    lengths: InputLengthRestrictions,
    events: EventService,
}

impl AuthorizeRequestValidator {
    #[must_use]
    pub fn new(
        clients: Arc<dyn ClientStore>,
        scopes: ScopeValidator,
        pkce: PkceValidator,
        lengths: InputLengthRestrictions,
        events: EventService,
    ) -> Self {
        Self {
            clients,
            scopes,
            pkce,
            lengths,
            events,
        }
    }

    /// Validates `parameters` for the current `subject`, if any.
    ///
    /// Failures raise an authorize failure event with the scrubbed
    /// parameters before they are returned.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthorizeRequestError`] naming the OAuth error and how it
    /// must be delivered.
    pub async fn validate(
        &self,
        parameters: &RequestParameters,
        subject: Option<&Subject>,
        cancel: &CancellationToken,
    ) -> Result<ValidatedAuthorizeRequest, AuthorizeRequestError> {
        match self.validate_inner(parameters, subject, cancel).await {
            Ok(request) => {
                tracing::debug!(
                    client_id = %request.client.client_id,
                    response_type = %request.response_type,
                    "Authorize request validated"
                );
                Ok(request)
            }
            Err(failure) => {
                tracing::warn!(
                    error = failure.error.oauth_error_code(),
                    local = failure.is_local(),
                    "Authorize request rejected: {}",
                    failure.error
                );
                let scrubbed = parameters.to_scrubbed_json();
                self.events
                    .authorize_request_failure(failure.error.oauth_error_code(), move || scrubbed);
                Err(failure)
            }
        }
    }

    async fn validate_inner(
        &self,
        parameters: &RequestParameters,
        subject: Option<&Subject>,
        cancel: &CancellationToken,
    ) -> Result<ValidatedAuthorizeRequest, AuthorizeRequestError> {
        // 1. client
        let client_id = parameters
            .get("client_id")
            .filter(|id| id.len() <= self.lengths.client_id)
            .ok_or_else(|| {
                AuthorizeRequestError::local(AuthError::invalid_request("client_id is missing or too long"))
            })?;
        let client = cancellable(cancel, self.clients.find_client_by_id(client_id))
            .await
            .map_err(AuthorizeRequestError::local)?
            .filter(|client| client.enabled)
            .ok_or_else(|| {
                AuthorizeRequestError::local(AuthError::invalid_request("Unknown client or client not enabled"))
            })?;

        // 2. redirect_uri
        let redirect_uri = parameters
            .get("redirect_uri")
            .filter(|uri| uri.len() <= self.lengths.redirect_uri)
            .ok_or_else(|| {
                AuthorizeRequestError::local(AuthError::invalid_request("redirect_uri is missing or too long"))
            })?;
        if url::Url::parse(redirect_uri).is_err() || !client.is_redirect_uri_allowed(redirect_uri) {
            tracing::warn!(client_id = %client.client_id, redirect_uri, "redirect_uri not registered");
            return Err(AuthorizeRequestError::local(AuthError::invalid_request(
                "Invalid redirect_uri",
            )));
        }
        let redirect_uri = redirect_uri.to_string();

        // From here on errors go back to the client.
        let state = parameters
            .get("state")
            .filter(|state| state.len() <= self.lengths.state)
            .map(str::to_string);
        let requested_mode = parameters.get("response_mode").map(ResponseMode::parse);
        let response_type = parameters.get("response_type").and_then(ResponseType::parse);
        let delivery_mode = match (requested_mode, response_type) {
            (Some(Some(mode)), _) => mode,
            (_, Some(response_type)) => response_type.default_response_mode(),
            _ => ResponseMode::Query,
        };
        let delivery = ErrorDelivery::Redirect {
            redirect_uri: redirect_uri.clone(),
            response_mode: delivery_mode,
            state: state.clone(),
        };
        let fail = |error: AuthError| AuthorizeRequestError::redirect(error, delivery.clone());

        // 3. response_type
        let Some(response_type) = response_type else {
            let raw = parameters.get("response_type").unwrap_or_default();
            return Err(fail(AuthError::unsupported_response_type(raw)));
        };
        let response_mode = match requested_mode {
            None => response_type.default_response_mode(),
            Some(None) => return Err(fail(AuthError::invalid_request("Invalid response_mode"))),
            Some(Some(ResponseMode::Query)) if response_type != ResponseType::Code => {
                return Err(fail(AuthError::invalid_request(
                    "Invalid response_mode for response_type",
                )));
            }
            Some(Some(mode)) => mode,
        };

        // 4. flow
        if client.flow.base() != response_type.flow() {
            tracing::warn!(
                client_id = %client.client_id,
                flow = ?client.flow,
                response_type = %response_type,
                "Response type not allowed for client flow"
            );
            return Err(fail(AuthError::unauthorized_client(
                "Invalid flow for client",
            )));
        }

        // 5. scope
        let scope = parameters
            .get("scope")
            .ok_or_else(|| fail(AuthError::invalid_request("scope is missing")))?;
        if scope.len() > self.lengths.scope {
            return Err(fail(AuthError::invalid_request("scope too long")));
        }
        let requested = parse_scopes(Some(scope))
            .ok_or_else(|| fail(AuthError::invalid_request("scope is missing")))?;
        let scopes = self
            .scopes
            .validate(&requested, &client, cancel)
            .await
            .map_err(&fail)?;
        check_response_type_scopes(response_type, &scopes).map_err(&fail)?;

        // 6. PKCE
        let proof_key = if response_type.includes_code() {
            self.pkce
                .validate_challenge(
                    parameters.get("code_challenge"),
                    parameters.get("code_challenge_method"),
                    client.requires_pkce(),
                )
                .map_err(|error| {
                    tracing::warn!(client_id = %client.client_id, %error, "Invalid PKCE challenge");
                    fail(AuthError::invalid_request(self.pkce.describe(&error)))
                })?
        } else {
            None
        };

        // 7. optional parameters
        if parameters.get("state").is_some() && state.is_none() {
            return Err(fail(AuthError::invalid_request("state too long")));
        }
        let nonce = self
            .bounded(parameters, "nonce", self.lengths.nonce)
            .map_err(&fail)?;
        let needs_nonce = response_type.flow() != Flow::AuthorizationCode && scopes.contains_open_id();
        if needs_nonce && nonce.is_none() {
            return Err(fail(AuthError::invalid_request(
                "nonce required for implicit and hybrid flow with openid scope",
            )));
        }
        let acr_values = self
            .bounded(parameters, "acr_values", self.lengths.acr_values)
            .map_err(&fail)?
            .map(|values| values.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let login_hint = self
            .bounded(parameters, "login_hint", self.lengths.login_hint)
            .map_err(&fail)?;
        let ui_locales = self
            .bounded(parameters, "ui_locales", self.lengths.ui_locale)
            .map_err(&fail)?;
        let prompts = parse_prompts(parameters.get("prompt")).map_err(&fail)?;
        let display = parameters
            .get("display")
            .map(|value| {
                Display::parse(value)
                    .ok_or_else(|| fail(AuthError::invalid_request("Unsupported display value")))
            })
            .transpose()?;
        let max_age = parameters
            .get("max_age")
            .map(|value| {
                value
                    .parse::<u64>()
                    .map_err(|_| fail(AuthError::invalid_request("Invalid max_age")))
            })
            .transpose()?;

        // 8. tokens via the browser
        if response_type.includes_access_token() && !client.allow_access_tokens_via_browser {
            tracing::warn!(
                client_id = %client.client_id,
                response_type = %response_type,
                "Client may not receive access tokens via the browser"
            );
            return Err(AuthorizeRequestError::local(AuthError::unauthorized_client(
                "Client not allowed to receive access tokens via browser",
            )));
        }

        Ok(ValidatedAuthorizeRequest {
            client,
            redirect_uri,
            response_type,
            response_mode,
            scopes,
            state,
            nonce,
            proof_key,
            acr_values,
            prompts,
            display,
            max_age,
            login_hint,
            ui_locales,
            subject: subject.cloned(),
            raw: parameters.clone(),
        })
    }

    fn bounded(
        &self,
        parameters: &RequestParameters,
        name: &str,
        max: usize,
    ) -> Result<Option<String>, AuthError> {
        match parameters.get(name) {
            Some(value) if value.len() > max => {
                Err(AuthError::invalid_request(format!("{name} too long")))
            }
            value => Ok(value.map(str::to_string)),
        }
    }
}

impl fmt::Debug for AuthorizeRequestValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizeRequestValidator")
            .field("lengths", &self.lengths)
            .finish_non_exhaustive()
    }
}

/// Scope rules that depend on what the response returns.
fn check_response_type_scopes(
    response_type: ResponseType,
    scopes: &ValidatedScopes,
) -> Result<(), AuthError> {
    if response_type.includes_identity_token() && !scopes.contains_open_id() {
        return Err(AuthError::invalid_scope(
            "openid scope required for id_token response types",
        ));
    }
    if scopes.contains_identity_scopes() && !scopes.contains_open_id() {
        return Err(AuthError::invalid_scope(
            "Identity scopes requested, but openid scope is missing",
        ));
    }
    if response_type == ResponseType::IdToken && scopes.contains_resource_scopes() {
        return Err(AuthError::invalid_scope(
            "id_token response type cannot request resource scopes",
        ));
    }
    if response_type.includes_access_token() && !scopes.contains_resource_scopes() {
        return Err(AuthError::invalid_scope(
            "token response types must request resource scopes",
        ));
    }
    Ok(())
}

fn parse_prompts(value: Option<&str>) -> Result<Vec<Prompt>, AuthError> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let mut prompts = Vec::new();
    for part in value.split_whitespace() {
        let prompt = Prompt::parse(part)
            .ok_or_else(|| AuthError::invalid_request("Unsupported prompt value"))?;
        if !prompts.contains(&prompt) {
            prompts.push(prompt);
        }
    }
    if prompts.contains(&Prompt::None) && prompts.len() > 1 {
        return Err(AuthError::invalid_request(
            "prompt=none cannot be combined with other values",
        ));
    }
    Ok(prompts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::{EventsOptions, PkceOptions};
    use crate::events::TracingEventSink;
    use crate::storage::{InMemoryClientStore, InMemoryScopeStore};
    use crate::types::{Scope, StandardScopes};
    use crate::validation::pkce::{CodeChallengeMethod, s256_challenge};

    const REDIRECT: &str = "https://app.example.com/callback";
    const VERIFIER: &str = "dBjftJeZ4CVP-mJ0kIkOfpgbdkjEfXNltyMcEiMg5Zs";

    fn client(client_id: &str, flow: Flow) -> Client {
        Client {
            client_id: client_id.to_string(),
            flow,
            redirect_uris: vec![REDIRECT.to_string()],
            allowed_scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "read".to_string(),
            ],
            ..Client::default()
        }
    }

    fn validator() -> AuthorizeRequestValidator {
        let no_browser_tokens = Client {
            allow_access_tokens_via_browser: false,
            ..client("implicit-strict", Flow::Implicit)
        };
        let disabled = Client {
            enabled: false,
            ..client("disabled", Flow::AuthorizationCode)
        };
        let clients = InMemoryClientStore::new(vec![
            client("code", Flow::AuthorizationCode),
            client("pkce", Flow::AuthorizationCodeWithProofKey),
            client("implicit", Flow::Implicit),
            client("hybrid", Flow::Hybrid),
            no_browser_tokens,
            disabled,
        ]);
        let mut scopes = StandardScopes::all();
        scopes.push(Scope::resource("read"));
        let clock = Arc::new(SystemClock);
        AuthorizeRequestValidator::new(
            Arc::new(clients),
            ScopeValidator::new(Arc::new(InMemoryScopeStore::new(scopes))),
            PkceValidator::new(PkceOptions::default()),
            InputLengthRestrictions::default(),
            EventService::new(EventsOptions::default(), Arc::new(TracingEventSink), clock),
        )
    }

    fn request(client_id: &str, response_type: &str, scope: &str) -> RequestParameters {
        RequestParameters::new()
            .with("client_id", client_id)
            .with("redirect_uri", REDIRECT)
            .with("response_type", response_type)
            .with("scope", scope)
            .with("state", "xyz")
            .with("nonce", "n-0S6_WzA2Mj")
    }

    async fn validate(
        parameters: &RequestParameters,
    ) -> Result<ValidatedAuthorizeRequest, AuthorizeRequestError> {
        validator()
            .validate(parameters, None, &CancellationToken::new())
            .await
    }

    #[test]
    fn test_response_type_order_insensitive() {
        assert_eq!(ResponseType::parse("token id_token"), Some(ResponseType::IdTokenToken));
        assert_eq!(
            ResponseType::parse("id_token token code"),
            Some(ResponseType::CodeIdTokenToken)
        );
        assert_eq!(ResponseType::parse("token"), None);
        assert_eq!(ResponseType::parse("code code"), Some(ResponseType::Code));
    }

    #[tokio::test]
    async fn test_valid_code_request() {
        let validated = validate(&request("code", "code", "openid read")).await.unwrap();
        assert_eq!(validated.response_type, ResponseType::Code);
        assert_eq!(validated.response_mode, ResponseMode::Query);
        assert_eq!(validated.scope_names(), vec!["openid", "read"]);
        assert_eq!(validated.state.as_deref(), Some("xyz"));
        assert!(validated.proof_key.is_none());
    }

    #[tokio::test]
    async fn test_unknown_or_disabled_client_is_local() {
        for client_id in ["nobody", "disabled"] {
            let err = validate(&request(client_id, "code", "openid")).await.unwrap_err();
            assert!(err.is_local());
            assert!(matches!(err.error, AuthError::InvalidRequest { .. }));
        }
    }

    #[tokio::test]
    async fn test_redirect_uri_must_match_exactly() {
        for uri in [
            "https://app.example.com/callback/extra",
            "https://app.example.com/call",
            "https://evil.example.com/callback",
        ] {
            let params = request("code", "code", "openid").with("redirect_uri", uri);
            let err = validate(&params).await.unwrap_err();
            assert!(err.is_local(), "{uri} must not be redirected to");
        }
    }

    #[tokio::test]
    async fn test_unsupported_response_type_redirects() {
        let err = validate(&request("code", "token", "read")).await.unwrap_err();
        assert!(matches!(err.error, AuthError::UnsupportedResponseType { .. }));
        assert!(matches!(
            err.delivery,
            ErrorDelivery::Redirect { ref state, .. } if state.as_deref() == Some("xyz")
        ));
    }

    #[tokio::test]
    async fn test_flow_must_match_client() {
        let err = validate(&request("code", "id_token", "openid")).await.unwrap_err();
        assert!(matches!(err.error, AuthError::UnauthorizedClient { .. }));
        assert!(!err.is_local());
    }

    #[tokio::test]
    async fn test_scope_rules() {
        let err = validate(&request("code", "code", "openid admin")).await.unwrap_err();
        assert!(matches!(err.error, AuthError::InvalidScope { .. }));

        let err = validate(&request("implicit", "id_token", "read")).await.unwrap_err();
        assert!(matches!(err.error, AuthError::InvalidScope { .. }));

        let err = validate(&request("implicit", "id_token", "openid read")).await.unwrap_err();
        assert!(matches!(err.error, AuthError::InvalidScope { .. }));

        let err = validate(&request("implicit", "id_token token", "openid profile"))
            .await
            .unwrap_err();
        assert!(matches!(err.error, AuthError::InvalidScope { .. }));

        let err = validate(&request("code", "code", "profile")).await.unwrap_err();
        assert!(matches!(err.error, AuthError::InvalidScope { .. }));

        let missing = request("code", "code", "openid").with("scope", "");
        let err = validate(&missing).await.unwrap_err();
        assert!(matches!(err.error, AuthError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_missing_code_challenge_for_proof_key_client() {
        let err = validate(&request("pkce", "code", "openid")).await.unwrap_err();
        assert!(matches!(
            &err.error,
            AuthError::InvalidRequest { message } if message == "code challenge required"
        ));
        assert!(matches!(err.delivery, ErrorDelivery::Redirect { .. }));
    }

    #[tokio::test]
    async fn test_code_challenge_captured() {
        let params = request("pkce", "code", "openid")
            .with("code_challenge", s256_challenge(VERIFIER))
            .with("code_challenge_method", "S256");
        let validated = validate(&params).await.unwrap();
        let proof_key = validated.proof_key.unwrap();
        assert_eq!(proof_key.method(), CodeChallengeMethod::S256);

        let bad_method = request_with_method("S512");
        let err = validate(&bad_method).await.unwrap_err();
        assert!(matches!(
            &err.error,
            AuthError::InvalidRequest { message } if message == "transform algorithm not supported"
        ));

        let short = request("pkce", "code", "openid").with("code_challenge", "short");
        let err = validate(&short).await.unwrap_err();
        assert!(matches!(err.error, AuthError::InvalidRequest { .. }));
    }

    fn request_with_method(method: &str) -> RequestParameters {
        request("pkce", "code", "openid")
            .with("code_challenge", s256_challenge(VERIFIER))
            .with("code_challenge_method", method)
    }

    #[tokio::test]
    async fn test_optional_parameters() {
        let params = request("code", "code", "openid")
            .with("prompt", "login consent")
            .with("display", "popup")
            .with("max_age", "300")
            .with("acr_values", "idp:google tenant:acme");
        let validated = validate(&params).await.unwrap();
        assert!(validated.has_prompt(Prompt::Login));
        assert!(validated.has_prompt(Prompt::Consent));
        assert_eq!(validated.display, Some(Display::Popup));
        assert_eq!(validated.max_age, Some(300));
        assert_eq!(validated.acr_values.len(), 2);

        let long_nonce = "n".repeat(301);
        for (name, value) in [
            ("prompt", "none login"),
            ("prompt", "sometimes"),
            ("display", "hologram"),
            ("max_age", "-1"),
            ("nonce", long_nonce.as_str()),
        ] {
            let params = request("code", "code", "openid").with(name, value);
            let err = validate(&params).await.unwrap_err();
            assert!(
                matches!(err.error, AuthError::InvalidRequest { .. }),
                "{name}={value} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_implicit_requires_nonce_and_fragment() {
        let params = request("implicit", "id_token", "openid profile");
        let validated = validate(&params).await.unwrap();
        assert_eq!(validated.response_mode, ResponseMode::Fragment);

        let no_nonce: RequestParameters = params
            .iter()
            .filter(|(name, _)| *name != "nonce")
            .collect();
        let err = validate(&no_nonce).await.unwrap_err();
        assert!(matches!(err.error, AuthError::InvalidRequest { .. }));

        let query = params.clone().with("response_mode", "query");
        let err = validate(&query).await.unwrap_err();
        assert!(matches!(err.error, AuthError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_tokens_via_browser_disallowed_is_local() {
        let err = validate(&request("implicit-strict", "id_token token", "openid read"))
            .await
            .unwrap_err();
        assert!(err.is_local());
        assert!(matches!(err.error, AuthError::UnauthorizedClient { .. }));

        assert!(
            validate(&request("implicit", "id_token token", "openid read"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_hybrid_request() {
        let validated = validate(&request("hybrid", "code id_token token", "openid read"))
            .await
            .unwrap();
        assert_eq!(validated.response_type.flow(), Flow::Hybrid);
        assert!(validated.response_type.includes_access_token());
        assert_eq!(validated.response_mode, ResponseMode::Fragment);
    }
}
