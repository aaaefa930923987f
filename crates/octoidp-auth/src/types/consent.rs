use serde::{Deserialize, Serialize};

/// Scopes a subject has agreed to release to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    pub subject: String,
    pub client_id: String,
    pub scopes: Vec<String>,
}

impl Consent {
    /// Returns `true` if every scope in `requested` was consented to.
    #[must_use]
    pub fn covers(&self, requested: &[String]) -> bool {
        requested.iter().all(|scope| self.scopes.contains(scope))
    }
}
