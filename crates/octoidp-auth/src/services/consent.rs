//! Consent decisions.

use std::sync::Arc;

use crate::AuthResult;
use crate::storage::ConsentStore;
use crate::types::{Client, Consent, scope_names};

/// Decides when the consent page must be shown and remembers decisions.
#[derive(Clone)]
pub struct ConsentService {
    store: Arc<dyn ConsentStore>,
}

impl ConsentService {
    #[must_use]
    pub fn new(store: Arc<dyn ConsentStore>) -> Self {
        Self { store }
    }

    /// Returns `true` if the subject must consent to `scopes` for `client`.
    ///
    /// `offline_access` always needs fresh consent. Otherwise a remembered
    /// consent covering every requested scope is enough.
    ///
    /// # Errors
    ///
    /// Propagates consent store failures.
    pub async fn requires_consent(
        &self,
        client: &Client,
        subject_id: &str,
        scopes: &[String],
    ) -> AuthResult<bool> {
        if !client.require_consent {
            return Ok(false);
        }
        if !client.allow_remember_consent {
            return Ok(true);
        }
        if scopes.iter().any(|scope| scope == scope_names::OFFLINE_ACCESS) {
            return Ok(true);
        }

        let consent = self.store.load(subject_id, &client.client_id).await?;
        Ok(!consent.is_some_and(|consent| consent.covers(scopes)))
    }

    /// Remembers the scopes the subject granted. An empty list forgets.
    ///
    /// Does nothing for clients that do not allow remembered consent.
    ///
    /// # Errors
    ///
    /// Propagates consent store failures.
    pub async fn update_consent(
        &self,
        client: &Client,
        subject_id: &str,
        scopes: &[String],
    ) -> AuthResult<()> {
        if !client.allow_remember_consent {
            return Ok(());
        }
        if scopes.is_empty() {
            return self.store.revoke(subject_id, &client.client_id).await;
        }
        tracing::debug!(client_id = %client.client_id, sub = %subject_id, "Remembering consent");
        self.store
            .update(Consent {
                subject: subject_id.to_string(),
                client_id: client.client_id.clone(),
                scopes: scopes.to_vec(),
            })
            .await
    }
}

impl std::fmt::Debug for ConsentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentService").finish_non_exhaustive()
    }
}
