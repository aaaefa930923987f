//! HTTP round trips through the assembled router.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use octoidp_auth::AuthResult;
use octoidp_auth::http::{AuthorizeSession, SubjectResolver};
use octoidp_auth::types::{Client, Flow, RequestParameters, Subject};
use octoidp_auth::validation::{generate_code_verifier, s256_challenge};
use octoidp_server::App;
use octoidp_server::config::{SeedClient, SeedUser, ServerConfig};
use serde_json::Value;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const CALLBACK: &str = "https://app.example.com/cb";

/// Treats every browser as signed in as subject `1`.
struct SignedIn;

#[async_trait]
impl SubjectResolver for SignedIn {
    async fn resolve(
        &self,
        _headers: &HeaderMap,
        _parameters: &RequestParameters,
    ) -> AuthResult<AuthorizeSession> {
        Ok(AuthorizeSession {
            subject: Some(Subject::local("1", "pwd", OffsetDateTime::now_utc())),
            consented_scopes: None,
        })
    }
}

fn config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.idp.issuer_uri = "https://idp.example.com".to_string();
    config.seed.clients.push(SeedClient {
        client: Client {
            client_id: "web".to_string(),
            flow: Flow::AuthorizationCodeWithProofKey,
            redirect_uris: vec![CALLBACK.to_string()],
            allowed_scopes: vec!["openid".to_string(), "email".to_string()],
            require_consent: false,
            ..Client::default()
        },
        secrets: vec!["secret".to_string()],
    });
    config.seed.users.push(SeedUser {
        subject_id: "1".to_string(),
        username: "alice".to_string(),
        password: "alice".to_string(),
        claims: [(
            "email".to_string(),
            Value::String("alice@example.com".to_string()),
        )]
        .into_iter()
        .collect(),
    });
    config
}

fn router(subjects: Arc<dyn SubjectResolver>) -> Router {
    App::from_config(&config(), subjects, CancellationToken::new())
        .unwrap()
        .router
}

fn form(pairs: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn code_flow_issues_tokens_and_userinfo() {
    let router = router(Arc::new(SignedIn));
    let verifier = generate_code_verifier();
    let challenge = s256_challenge(&verifier);

    // authorize
    let query = form(&[
        ("client_id", "web"),
        ("redirect_uri", CALLBACK),
        ("response_type", "code"),
        ("scope", "openid email"),
        ("state", "abc"),
        ("code_challenge", challenge.as_str()),
        ("code_challenge_method", "S256"),
    ]);
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/connect/authorize?{query}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    let location = url::Url::parse(location).unwrap();
    assert!(location.as_str().starts_with(CALLBACK));
    let pairs: Vec<(String, String)> = location.query_pairs().into_owned().collect();
    let code = pairs
        .iter()
        .find(|(name, _)| name == "code")
        .map(|(_, value)| value.clone())
        .unwrap();
    assert!(pairs.contains(&("state".to_string(), "abc".to_string())));

    // token
    let redeem = form(&[
        ("grant_type", "authorization_code"),
        ("client_id", "web"),
        ("client_secret", "secret"),
        ("code", code.as_str()),
        ("redirect_uri", CALLBACK),
        ("code_verifier", verifier.as_str()),
    ]);
    let token_request = |body: String| {
        Request::builder()
            .method("POST")
            .uri("/connect/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    };
    let response = router
        .clone()
        .oneshot(token_request(redeem.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let tokens = json_body(response).await;
    assert_eq!(tokens["token_type"], "Bearer");
    assert!(tokens["id_token"].is_string());
    let access_token = tokens["access_token"].as_str().unwrap().to_string();

    // the code is gone
    let response = router.clone().oneshot(token_request(redeem)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_grant");

    // userinfo
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/connect/userinfo")
                .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let claims = json_body(response).await;
    assert_eq!(claims["sub"], "1");
    assert_eq!(claims["email"], "alice@example.com");
}

#[tokio::test]
async fn anonymous_browser_is_sent_to_login() {
    let router = router(Arc::new(octoidp_auth::http::AnonymousSubjectResolver));
    let challenge = s256_challenge(&generate_code_verifier());
    let query = form(&[
        ("client_id", "web"),
        ("redirect_uri", CALLBACK),
        ("response_type", "code"),
        ("scope", "openid"),
        ("code_challenge", challenge.as_str()),
        ("code_challenge_method", "S256"),
    ]);
    let response = router
        .oneshot(
            Request::builder()
                .uri(format!("/connect/authorize?{query}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(!location.starts_with(CALLBACK));
}

#[tokio::test]
async fn bad_client_secret_is_unauthorized() {
    let router = router(Arc::new(SignedIn));
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/connect/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form(&[
                    ("grant_type", "authorization_code"),
                    ("client_id", "web"),
                    ("client_secret", "wrong"),
                    ("code", "whatever"),
                ])))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "invalid_client");
}

#[tokio::test]
async fn discovery_names_seeded_issuer() {
    let router = router(Arc::new(SignedIn));
    let response = router
        .oneshot(
            Request::builder()
                .uri("/.well-known/openid-configuration")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let document = json_body(response).await;
    assert_eq!(document["issuer"], "https://idp.example.com");
    assert_eq!(
        document["token_endpoint"],
        "https://idp.example.com/connect/token"
    );
}
