//! User authentication and profile data.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::cache::SingleFlightCache;
use crate::clock::SharedClock;
use crate::config::CachingOptions;
use crate::crypto;
use crate::types::{Claim, Client, LOCAL_IDENTITY_PROVIDER, Subject, claim_types};

/// Authentication method reference of password logins.
pub const PASSWORD_AMR: &str = "pwd";

/// Resource owner credentials presented to [`UserService::authenticate_local`].
#[derive(Clone)]
pub struct LocalAuthenticationContext {
    pub username: String,
    pub password: String,
    /// The client on whose behalf the user logs in, if any.
    pub client_id: Option<String>,
}

impl fmt::Debug for LocalAuthenticationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAuthenticationContext")
            .field("username", &self.username)
            .field("password", &"***")
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// Outcome of a local login.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthenticateResult {
    Success(Subject),
    Failure { message: String },
}

/// Who is asking for profile data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileDataCaller {
    IdentityToken,
    AccessToken,
    UserInfoEndpoint,
}

/// Arguments of [`UserService::get_profile_data`].
#[derive(Debug, Clone, Copy)]
pub struct ProfileDataRequest<'a> {
    pub subject: &'a Subject,
    pub client: &'a Client,
    /// `None` asks for every claim the user has.
    pub requested_claim_types: Option<&'a [String]>,
    pub caller: ProfileDataCaller,
}

/// The user collaborator.
#[async_trait]
pub trait UserService: Send + Sync {
    /// Checks resource owner credentials.
    async fn authenticate_local(
        &self,
        context: &LocalAuthenticationContext,
    ) -> AuthResult<AuthenticateResult>;

    /// Returns profile claims of the subject.
    async fn get_profile_data(&self, request: &ProfileDataRequest<'_>) -> AuthResult<Vec<Claim>>;

    /// Returns `false` if the subject may no longer obtain or use tokens.
    async fn is_active(&self, subject_id: &str, client: &Client) -> AuthResult<bool>;
}

// =============================================================================
// In-memory users
// =============================================================================

/// A user of [`InMemoryUserService`].
#[derive(Clone, Serialize, Deserialize)]
pub struct InMemoryUser {
    pub subject_id: String,
    pub username: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub claims: Vec<Claim>,
}

fn default_enabled() -> bool {
    true
}

fn default_provider() -> String {
    LOCAL_IDENTITY_PROVIDER.to_string()
}

impl InMemoryUser {
    /// Creates an enabled local user, hashing `password`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if hashing fails.
    pub fn with_password(
        subject_id: impl Into<String>,
        username: impl Into<String>,
        password: &str,
    ) -> AuthResult<Self> {
        Ok(Self {
            subject_id: subject_id.into(),
            username: username.into(),
            password_hash: crypto::hash_secret(password)?,
            enabled: true,
            provider: default_provider(),
            claims: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_claim(mut self, claim_type: &str, value: impl Into<serde_json::Value>) -> Self {
        self.claims.push(Claim::new(claim_type, value));
        self
    }
}

impl fmt::Debug for InMemoryUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryUser")
            .field("subject_id", &self.subject_id)
            .field("username", &self.username)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Users held in memory with argon2 password hashes.
#[derive(Debug)]
pub struct InMemoryUserService {
    users: Vec<InMemoryUser>,
    clock: SharedClock,
}

impl InMemoryUserService {
    #[must_use]
    pub fn new(users: Vec<InMemoryUser>, clock: SharedClock) -> Self {
        Self { users, clock }
    }

    fn by_subject(&self, subject_id: &str) -> Option<&InMemoryUser> {
        self.users.iter().find(|user| user.subject_id == subject_id)
    }
}

#[async_trait]
impl UserService for InMemoryUserService {
    async fn authenticate_local(
        &self,
        context: &LocalAuthenticationContext,
    ) -> AuthResult<AuthenticateResult> {
        let user = self
            .users
            .iter()
            .find(|user| user.username == context.username && user.enabled);

        let Some(user) = user else {
            return Ok(AuthenticateResult::Failure {
                message: "Invalid username or password".to_string(),
            });
        };
        if !crypto::verify_secret(&context.password, &user.password_hash) {
            return Ok(AuthenticateResult::Failure {
                message: "Invalid username or password".to_string(),
            });
        }

        let display_name = user
            .claims
            .iter()
            .find(|claim| claim.claim_type == claim_types::NAME)
            .and_then(Claim::value_str)
            .unwrap_or(&user.username)
            .to_string();

        let mut subject = Subject::local(&user.subject_id, PASSWORD_AMR, self.clock.now())
            .with_name(display_name);
        subject.identity_provider = user.provider.clone();
        Ok(AuthenticateResult::Success(subject))
    }

    async fn get_profile_data(&self, request: &ProfileDataRequest<'_>) -> AuthResult<Vec<Claim>> {
        let Some(user) = self.by_subject(&request.subject.subject_id) else {
            return Ok(Vec::new());
        };
        Ok(user
            .claims
            .iter()
            .filter(|claim| {
                request
                    .requested_claim_types
                    .is_none_or(|types| types.contains(&claim.claim_type))
            })
            .cloned()
            .collect())
    }

    async fn is_active(&self, subject_id: &str, _client: &Client) -> AuthResult<bool> {
        Ok(self.by_subject(subject_id).is_some_and(|user| user.enabled))
    }
}

// =============================================================================
// Caching decorator
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProfileKey {
    subject_id: String,
    client_id: String,
    caller: ProfileDataCaller,
    claim_types: Option<Vec<String>>,
}

/// Caches profile data and activity checks. Logins are not cached.
pub struct CachingUserService {
    inner: Arc<dyn UserService>,
    profiles: SingleFlightCache<ProfileKey, Vec<Claim>>,
    active: SingleFlightCache<(String, String), bool>,
}

impl CachingUserService {
    #[must_use]
    pub fn new(inner: Arc<dyn UserService>, options: &CachingOptions) -> Self {
        Self {
            inner,
            profiles: SingleFlightCache::new(options.max_capacity, options.ttl),
            active: SingleFlightCache::new(options.max_capacity, options.ttl),
        }
    }
}

#[async_trait]
impl UserService for CachingUserService {
    async fn authenticate_local(
        &self,
        context: &LocalAuthenticationContext,
    ) -> AuthResult<AuthenticateResult> {
        self.inner.authenticate_local(context).await
    }

    async fn get_profile_data(&self, request: &ProfileDataRequest<'_>) -> AuthResult<Vec<Claim>> {
        let key = ProfileKey {
            subject_id: request.subject.subject_id.clone(),
            client_id: request.client.client_id.clone(),
            caller: request.caller,
            claim_types: request.requested_claim_types.map(|types| {
                let mut types = types.to_vec();
                types.sort();
                types
            }),
        };
        let inner = self.inner.clone();
        let subject = request.subject.clone();
        let client = request.client.clone();
        let claim_types = key.claim_types.clone();
        let caller = request.caller;
        self.profiles
            .get_or_compute(key, || async move {
                inner
                    .get_profile_data(&ProfileDataRequest {
                        subject: &subject,
                        client: &client,
                        requested_claim_types: claim_types.as_deref(),
                        caller,
                    })
                    .await
            })
            .await
    }

    async fn is_active(&self, subject_id: &str, client: &Client) -> AuthResult<bool> {
        let inner = self.inner.clone();
        let subject_id = subject_id.to_string();
        let client = client.clone();
        self.active
            .get_or_compute((subject_id.clone(), client.client_id.clone()), || async move {
                inner.is_active(&subject_id, &client).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn service() -> InMemoryUserService {
        let alice = InMemoryUser::with_password("818727", "alice", "alice-password")
            .unwrap()
            .with_claim("name", "Alice Smith")
            .with_claim("email", "alice@example.com")
            .with_claim("email_verified", true);
        let mut bob = InMemoryUser::with_password("88421113", "bob", "bob-password").unwrap();
        bob.enabled = false;
        InMemoryUserService::new(vec![alice, bob], Arc::new(SystemClock))
    }

    fn login(username: &str, password: &str) -> LocalAuthenticationContext {
        LocalAuthenticationContext {
            username: username.to_string(),
            password: password.to_string(),
            client_id: None,
        }
    }

    #[tokio::test]
    async fn test_authenticate_local() {
        let users = service();

        let result = users
            .authenticate_local(&login("alice", "alice-password"))
            .await
            .unwrap();
        let AuthenticateResult::Success(subject) = result else {
            panic!("expected success, got {result:?}");
        };
        assert_eq!(subject.subject_id, "818727");
        assert_eq!(subject.name.as_deref(), Some("Alice Smith"));
        assert_eq!(subject.authentication_methods, vec!["pwd"]);

        assert!(matches!(
            users.authenticate_local(&login("alice", "wrong")).await.unwrap(),
            AuthenticateResult::Failure { .. }
        ));
        assert!(matches!(
            users.authenticate_local(&login("bob", "bob-password")).await.unwrap(),
            AuthenticateResult::Failure { .. }
        ));
    }

    #[tokio::test]
    async fn test_profile_data_filtered_by_type() {
        let users = service();
        let subject = Subject::local("818727", "pwd", time::OffsetDateTime::UNIX_EPOCH);
        let client = Client::default();
        let requested = vec!["email".to_string()];

        let claims = users
            .get_profile_data(&ProfileDataRequest {
                subject: &subject,
                client: &client,
                requested_claim_types: Some(&requested),
                caller: ProfileDataCaller::IdentityToken,
            })
            .await
            .unwrap();
        assert_eq!(claims, vec![Claim::new("email", "alice@example.com")]);

        let all = users
            .get_profile_data(&ProfileDataRequest {
                subject: &subject,
                client: &client,
                requested_claim_types: None,
                caller: ProfileDataCaller::UserInfoEndpoint,
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_is_active() {
        let users = CachingUserService::new(Arc::new(service()), &CachingOptions::default());
        let client = Client::default();
        assert!(users.is_active("818727", &client).await.unwrap());
        assert!(!users.is_active("88421113", &client).await.unwrap());
        assert!(!users.is_active("unknown", &client).await.unwrap());
    }

    #[test]
    fn test_context_debug_masks_password() {
        let debug = format!("{:?}", login("alice", "alice-password"));
        assert!(!debug.contains("alice-password"));
    }
}
