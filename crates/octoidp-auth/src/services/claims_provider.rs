//! Claim assembly for identity and access tokens.

use std::sync::Arc;

use async_trait::async_trait;

use super::claims_filter::{AggregateClaimsFilter, ClaimsFilter};
use super::user::{ProfileDataCaller, ProfileDataRequest, UserService};
use crate::AuthResult;
use crate::types::{Claim, Client, Scope, Subject, claim_types};

/// Produces the subject and scope dependent claims of a token.
///
/// Protocol claims (`iss`, `aud`, `exp`, `nonce`, hashes, ...) are added by
/// the token factory, not here.
#[async_trait]
pub trait ClaimsProvider: Send + Sync {
    /// Claims of an identity token.
    ///
    /// With `include_all_identity_claims` every claim of the requested
    /// identity scopes is included (no access token is issued alongside);
    /// otherwise only claims marked `always_include_in_id_token`.
    async fn identity_token_claims(
        &self,
        subject: &Subject,
        client: &Client,
        scopes: &[Scope],
        include_all_identity_claims: bool,
    ) -> AuthResult<Vec<Claim>>;

    /// Claims of an access token. `subject` is `None` for client credentials.
    async fn access_token_claims(
        &self,
        subject: Option<&Subject>,
        client: &Client,
        scopes: &[Scope],
    ) -> AuthResult<Vec<Claim>>;
}

/// Which profile claim types a token asks the user service for.
enum ClaimSelection {
    Nothing,
    All,
    Types(Vec<String>),
}

fn select_claims<'a>(
    scopes: impl Iterator<Item = &'a Scope>,
    include: impl Fn(&crate::types::ScopeClaim) -> bool,
) -> ClaimSelection {
    let mut types: Vec<String> = Vec::new();
    for scope in scopes {
        if scope.include_all_claims_for_user {
            return ClaimSelection::All;
        }
        for claim in scope.claims.iter().filter(|claim| include(claim)) {
            if !types.contains(&claim.name) {
                types.push(claim.name.clone());
            }
        }
    }
    if types.is_empty() {
        ClaimSelection::Nothing
    } else {
        ClaimSelection::Types(types)
    }
}

/// Claims from the subject and the [`UserService`].
pub struct DefaultClaimsProvider {
    users: Arc<dyn UserService>,
    filter: AggregateClaimsFilter,
}

impl DefaultClaimsProvider {
    #[must_use]
    pub fn new(users: Arc<dyn UserService>, filter: AggregateClaimsFilter) -> Self {
        Self { users, filter }
    }

    async fn profile_claims(
        &self,
        subject: &Subject,
        client: &Client,
        selection: ClaimSelection,
        caller: ProfileDataCaller,
    ) -> AuthResult<Vec<Claim>> {
        let requested = match selection {
            ClaimSelection::Nothing => return Ok(Vec::new()),
            ClaimSelection::All => None,
            ClaimSelection::Types(types) => Some(types),
        };

        let claims = self
            .users
            .get_profile_data(&ProfileDataRequest {
                subject,
                client,
                requested_claim_types: requested.as_deref(),
                caller,
            })
            .await?;

        let mut claims = self.filter.filter(&subject.identity_provider, claims);
        claims.retain(|claim| !claim.is_protocol_claim());
        Ok(claims)
    }
}

#[async_trait]
impl ClaimsProvider for DefaultClaimsProvider {
    async fn identity_token_claims(
        &self,
        subject: &Subject,
        client: &Client,
        scopes: &[Scope],
        include_all_identity_claims: bool,
    ) -> AuthResult<Vec<Claim>> {
        let mut claims = subject.standard_claims();

        let identity_scopes = scopes.iter().filter(|scope| scope.is_identity());
        let selection = if include_all_identity_claims {
            select_claims(identity_scopes, |_| true)
        } else {
            // include_all_claims_for_user only applies when every claim is wanted.
            let always = identity_scopes.filter(|scope| !scope.include_all_claims_for_user);
            select_claims(always, |claim| claim.always_include_in_id_token)
        };

        claims.extend(
            self.profile_claims(subject, client, selection, ProfileDataCaller::IdentityToken)
                .await?,
        );
        Ok(claims)
    }

    async fn access_token_claims(
        &self,
        subject: Option<&Subject>,
        client: &Client,
        scopes: &[Scope],
    ) -> AuthResult<Vec<Claim>> {
        let mut claims = vec![Claim::new(claim_types::CLIENT_ID, client.client_id.clone())];

        if !client.claims.is_empty() && (subject.is_none() || client.always_send_client_claims) {
            claims.extend(client.claims.iter().map(|claim| {
                if client.prefix_client_claims {
                    Claim::new(format!("client_{}", claim.claim_type), claim.value.clone())
                } else {
                    claim.clone()
                }
            }));
        }

        claims.extend(
            scopes
                .iter()
                .map(|scope| Claim::new(claim_types::SCOPE, scope.name.clone())),
        );

        if let Some(subject) = subject {
            claims.extend(subject.standard_claims());

            let resource_scopes = scopes.iter().filter(|scope| !scope.is_identity());
            let selection = select_claims(resource_scopes, |_| true);
            claims.extend(
                self.profile_claims(subject, client, selection, ProfileDataCaller::AccessToken)
                    .await?,
            );
        }

        Ok(claims)
    }
}

impl std::fmt::Debug for DefaultClaimsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultClaimsProvider")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}
