//! UserInfo endpoint response generation.
//!
//! The caller's access token has already been validated with the `openid`
//! scope. The response carries `sub` plus the profile claims of the identity
//! scopes the token was issued for.

use std::sync::Arc;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::AuthResult;
use crate::cancellation::cancellable;
use crate::error::AuthError;
use crate::services::{
    AggregateClaimsFilter, ClaimsFilter, ProfileDataCaller, ProfileDataRequest, UserService,
};
use crate::storage::ScopeStore;
use crate::token::TokenValidationResult;
use crate::types::{LOCAL_IDENTITY_PROVIDER, Subject, claim_types, claims_to_object};

/// Builds UserInfo claim sets.
#[derive(Clone)]
pub struct UserInfoResponseGenerator {
    scopes: Arc<dyn ScopeStore>,
    users: Arc<dyn UserService>,
    filter: AggregateClaimsFilter,
}

impl UserInfoResponseGenerator {
    #[must_use]
    pub fn new(
        scopes: Arc<dyn ScopeStore>,
        users: Arc<dyn UserService>,
        filter: AggregateClaimsFilter,
    ) -> Self {
        Self {
            scopes,
            users,
            filter,
        }
    }

    /// # Errors
    ///
    /// Returns `AuthError::InvalidToken` for a token without subject and
    /// propagates store and user service failures.
    pub async fn generate(
        &self,
        validation: &TokenValidationResult,
        cancel: &CancellationToken,
    ) -> AuthResult<Map<String, Value>> {
        let subject = subject_of(validation)
            .ok_or_else(|| AuthError::invalid_token("Token has no subject"))?;

        let names = validation.scopes();
        let scopes = cancellable(cancel, self.scopes.find_scopes_by_names(&names)).await?;
        let identity: Vec<_> = scopes
            .iter()
            .filter(|scope| scope.enabled && scope.is_identity())
            .collect();

        let requested: Option<Vec<String>> =
            if identity.iter().any(|scope| scope.include_all_claims_for_user) {
                None
            } else {
                let mut types: Vec<String> = Vec::new();
                for name in identity.iter().flat_map(|scope| scope.claim_names()) {
                    if !types.iter().any(|t| t == name) {
                        types.push(name.to_string());
                    }
                }
                Some(types)
            };

        let mut claims = match &requested {
            Some(types) if types.is_empty() => Vec::new(),
            requested => {
                cancellable(
                    cancel,
                    self.users.get_profile_data(&ProfileDataRequest {
                        subject: &subject,
                        client: &validation.client,
                        requested_claim_types: requested.as_deref(),
                        caller: ProfileDataCaller::UserInfoEndpoint,
                    }),
                )
                .await?
            }
        };
        claims = self.filter.filter(&subject.identity_provider, claims);
        claims.retain(|claim| !claim.is_protocol_claim());

        let mut response = Map::new();
        response.insert(
            claim_types::SUBJECT.to_string(),
            Value::String(subject.subject_id.clone()),
        );
        response.extend(claims_to_object(&claims, &[]));

        tracing::debug!(
            sub = %subject.subject_id,
            client_id = %validation.client.client_id,
            claims = response.len(),
            "UserInfo response generated"
        );
        Ok(response)
    }
}

/// The subject as far as the token describes it.
fn subject_of(validation: &TokenValidationResult) -> Option<Subject> {
    let claims = &validation.claims;
    let subject_id = validation.subject_id()?.to_string();
    let auth_time = claims
        .get(claim_types::AUTHENTICATION_TIME)
        .and_then(Value::as_i64)
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let authentication_methods = match claims.get(claim_types::AUTHENTICATION_METHOD) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(value)) => vec![value.clone()],
        _ => Vec::new(),
    };
    let identity_provider = claims
        .get(claim_types::IDENTITY_PROVIDER)
        .and_then(Value::as_str)
        .unwrap_or(LOCAL_IDENTITY_PROVIDER)
        .to_string();

    Some(Subject {
        subject_id,
        name: None,
        auth_time,
        authentication_methods,
        identity_provider,
        claims: Vec::new(),
    })
}

impl std::fmt::Debug for UserInfoResponseGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserInfoResponseGenerator")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::services::{InMemoryUser, InMemoryUserService, RenameClaimTypesFilter};
    use crate::storage::InMemoryScopeStore;
    use crate::types::{Client, StandardScopes};
    use serde_json::json;
    use time::macros::datetime;

    fn generator(filter: AggregateClaimsFilter) -> UserInfoResponseGenerator {
        let clock = Arc::new(ManualClock::new(datetime!(2024-06-01 12:00 UTC)));
        let alice = InMemoryUser::with_password("alice", "alice", "pw")
            .unwrap()
            .with_claim("name", "Alice Smith")
            .with_claim("email", "alice@example.com")
            .with_claim("role", "admin");
        UserInfoResponseGenerator::new(
            Arc::new(InMemoryScopeStore::new(StandardScopes::all())),
            Arc::new(InMemoryUserService::new(vec![alice], clock)),
            filter,
        )
    }

    fn validation(scope: Value) -> TokenValidationResult {
        let claims = json!({
            "sub": "alice",
            "client_id": "c1",
            "scope": scope,
            "idp": "idsrv",
        });
        let Value::Object(claims) = claims else {
            unreachable!()
        };
        TokenValidationResult {
            claims,
            client: Client {
                client_id: "c1".to_string(),
                ..Client::default()
            },
            reference_token: None,
            jwt: None,
        }
    }

    #[tokio::test]
    async fn test_claims_follow_identity_scopes() {
        let generator = generator(AggregateClaimsFilter::default());
        let response = generator
            .generate(&validation(json!(["openid", "email"])), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response["sub"], "alice");
        assert_eq!(response["email"], "alice@example.com");
        assert!(!response.contains_key("name"));
        assert!(!response.contains_key("role"));
    }

    #[tokio::test]
    async fn test_openid_only_returns_sub() {
        let generator = generator(AggregateClaimsFilter::default());
        let response = generator
            .generate(&validation(json!("openid")), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(Value::Object(response), json!({ "sub": "alice" }));
    }

    #[tokio::test]
    async fn test_filters_apply() {
        let filter = AggregateClaimsFilter::default()
            .with(RenameClaimTypesFilter::new().rename("name", "display_name"));
        let response = generator(filter)
            .generate(&validation(json!("openid profile")), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response["display_name"], "Alice Smith");
        assert!(!response.contains_key("name"));
    }

    #[tokio::test]
    async fn test_token_without_subject() {
        let mut validation = validation(json!("openid"));
        validation.claims.remove("sub");
        let result = generator(AggregateClaimsFilter::default())
            .generate(&validation, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AuthError::InvalidToken { .. })));
    }
}
