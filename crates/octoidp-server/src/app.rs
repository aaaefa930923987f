//! Application assembly: seeded stores, identity provider and router.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use octoidp_auth::clock::{SharedClock, SystemClock};
use octoidp_auth::http::{IdpState, SubjectResolver, router};
use octoidp_auth::provider::IdentityProvider;
use octoidp_auth::services::InMemoryUserService;
use octoidp_auth::storage::{InMemoryClientStore, InMemoryHandleStore, InMemoryScopeStore};
use octoidp_auth::types::{AuthorizationCode, RefreshToken, Token};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::keys::load_signing_key;

/// Handle stores kept concrete so the purge task can sweep them.
#[derive(Clone)]
pub struct Stores {
    pub authorization_codes: Arc<InMemoryHandleStore<AuthorizationCode>>,
    pub token_handles: Arc<InMemoryHandleStore<Token>>,
    pub refresh_tokens: Arc<InMemoryHandleStore<RefreshToken>>,
}

impl Stores {
    fn new(clock: &SharedClock) -> Self {
        Self {
            authorization_codes: Arc::new(InMemoryHandleStore::new(clock.clone())),
            token_handles: Arc::new(InMemoryHandleStore::new(clock.clone())),
            refresh_tokens: Arc::new(InMemoryHandleStore::new(clock.clone())),
        }
    }

    /// Drops expired items and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.authorization_codes.purge_expired()
            + self.token_handles.purge_expired()
            + self.refresh_tokens.purge_expired()
    }
}

pub struct App {
    pub router: Router,
    pub provider: Arc<IdentityProvider>,
    pub stores: Stores,
}

impl App {
    /// Builds the provider from `config` and routes its endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid seed data, unreadable keys or a provider
    /// that fails to assemble.
    pub fn build(
        config: &ServerConfig,
        clock: SharedClock,
        subjects: Arc<dyn SubjectResolver>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let clients = config.seed.clients()?;
        let scopes = config.seed.scopes();
        let users = config.seed.users()?;
        tracing::info!(
            clients = clients.len(),
            scopes = scopes.len(),
            users = users.len(),
            "Seeding in-memory stores"
        );

        let stores = Stores::new(&clock);
        let mut builder = IdentityProvider::builder(config.idp.clone())
            .with_clock(clock.clone())
            .with_client_store(Arc::new(InMemoryClientStore::new(clients)))
            .with_scope_store(Arc::new(InMemoryScopeStore::new(scopes)))
            .with_user_service(Arc::new(InMemoryUserService::new(users, clock)))
            .with_authorization_code_store(stores.authorization_codes.clone())
            .with_token_handle_store(stores.token_handles.clone())
            .with_refresh_token_store(stores.refresh_tokens.clone());
        if let Some(key) = load_signing_key(&config.idp.signing)? {
            builder = builder.with_signing_key(key);
        }

        let provider = Arc::new(builder.build()?);
        let state = IdpState::new(provider.clone(), subjects, shutdown);
        let router = router(state).layer(TraceLayer::new_for_http());

        Ok(Self {
            router,
            provider,
            stores,
        })
    }

    /// [`App::build`] with the system clock.
    ///
    /// # Errors
    ///
    /// See [`App::build`].
    pub fn from_config(
        config: &ServerConfig,
        subjects: Arc<dyn SubjectResolver>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        Self::build(config, Arc::new(SystemClock), subjects, shutdown)
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// Sweeps expired handles every `interval` until `shutdown` fires.
pub fn spawn_purge_task(
    stores: Stores,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = stores.purge_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "Purged expired handles");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use octoidp_auth::clock::ManualClock;
    use octoidp_auth::http::AnonymousSubjectResolver;
    use octoidp_auth::storage::HandleStore;
    use octoidp_auth::types::{Claim, TokenKind};
    use time::macros::datetime;

    fn token(lifetime: u64) -> Token {
        Token {
            kind: TokenKind::AccessToken,
            issuer: "http://localhost:5000".to_string(),
            audience: "http://localhost:5000/resources".to_string(),
            client_id: "c1".to_string(),
            created_at: datetime!(2024-01-01 0:00 UTC),
            lifetime,
            access_token_type: octoidp_auth::types::AccessTokenType::Reference,
            claims: vec![Claim::new("client_id", "c1")],
            confirmation: None,
        }
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired_handles() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 0:00 UTC)));
        let app = App::build(
            &ServerConfig::default(),
            clock.clone(),
            Arc::new(AnonymousSubjectResolver),
            CancellationToken::new(),
        )
        .unwrap();

        let handles = &app.stores.token_handles;
        handles.store("short", token(60)).await.unwrap();
        handles.store("long", token(3600)).await.unwrap();

        clock.advance(time::Duration::minutes(5));
        assert_eq!(app.stores.purge_expired(), 1);
        assert_eq!(handles.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_task_stops_on_shutdown() {
        let clock: SharedClock = Arc::new(SystemClock);
        let shutdown = CancellationToken::new();
        let task = spawn_purge_task(
            Stores::new(&clock),
            Duration::from_millis(10),
            shutdown.clone(),
        );
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
