//! Performance benchmarks for request and token validation.
//!
//! Run with: `cargo bench -p octoidp-auth validation`

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use octoidp_auth::config::IdpOptions;
use octoidp_auth::crypto;
use octoidp_auth::provider::IdentityProvider;
use octoidp_auth::storage::{InMemoryClientStore, InMemoryScopeStore};
use octoidp_auth::types::{
    AccessTokenType, Client, Flow, RequestParameters, Scope, Secret, StandardScopes,
};
use octoidp_auth::validation::{
    PkceValidator, generate_code_verifier, parse_scopes, s256_challenge,
};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

fn bench_provider() -> IdentityProvider {
    let secret = Secret::hashed(crypto::hash_secret("secret").unwrap());
    let clients = ["jwt", "reference"].map(|client_id| Client {
        client_id: client_id.to_string(),
        flow: Flow::ClientCredentials,
        client_secrets: vec![secret.clone()],
        allowed_scopes: vec!["api.read".to_string(), "api.write".to_string()],
        access_token_type: if client_id == "jwt" {
            AccessTokenType::Jwt
        } else {
            AccessTokenType::Reference
        },
        ..Client::default()
    });
    let mut scopes = StandardScopes::all();
    scopes.extend(["api.read", "api.write"].into_iter().map(Scope::resource));
    IdentityProvider::builder(IdpOptions::default())
        .with_client_store(Arc::new(InMemoryClientStore::new(clients)))
        .with_scope_store(Arc::new(InMemoryScopeStore::new(scopes)))
        .build()
        .unwrap()
}

fn issue(rt: &Runtime, provider: &IdentityProvider, client_id: &str) -> String {
    let cancel = CancellationToken::new();
    let parameters = RequestParameters::new()
        .with("grant_type", "client_credentials")
        .with("client_id", client_id)
        .with("client_secret", "secret")
        .with("scope", "api.read api.write");
    rt.block_on(async {
        let request = provider
            .token_request_validator
            .validate(None, &parameters, &cancel)
            .await
            .unwrap();
        provider
            .token_responses
            .generate(&request, &cancel)
            .await
            .unwrap()
            .access_token
    })
}

/// PKCE verifier check for both methods.
fn bench_pkce(c: &mut Criterion) {
    let pkce = PkceValidator::new(IdpOptions::default().pkce);
    let verifier = generate_code_verifier();
    let plain = pkce
        .validate_challenge(Some(&verifier), Some("plain"), true)
        .unwrap()
        .unwrap();
    let s256 = pkce
        .validate_challenge(Some(&s256_challenge(&verifier)), Some("S256"), true)
        .unwrap()
        .unwrap();

    c.bench_function("pkce_plain_verify", |b| {
        b.iter(|| black_box(pkce.validate_verifier(Some(&verifier), &plain)));
    });
    c.bench_function("pkce_s256_verify", |b| {
        b.iter(|| black_box(pkce.validate_verifier(Some(&verifier), &s256)));
    });
}

fn bench_scope_parsing(c: &mut Criterion) {
    let scope = "openid profile email offline_access api.read api.write profile";
    c.bench_function("parse_scopes", |b| {
        b.iter(|| black_box(parse_scopes(Some(black_box(scope)))));
    });
}

/// Access token validation, signature check versus handle lookup.
fn bench_access_token_validation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let provider = bench_provider();
    let jwt = issue(&rt, &provider, "jwt");
    let reference = issue(&rt, &provider, "reference");
    let cancel = CancellationToken::new();

    let mut group = c.benchmark_group("access_token_validation");
    group.bench_function("jwt", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                provider
                    .token_validator
                    .validate_access_token(&jwt, Some("api.read"), &cancel)
                    .await
                    .unwrap(),
            )
        });
    });
    group.bench_function("reference", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                provider
                    .token_validator
                    .validate_access_token(&reference, Some("api.read"), &cancel)
                    .await
                    .unwrap(),
            )
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_pkce,
    bench_scope_parsing,
    bench_access_token_validation
);
criterion_main!(benches);
