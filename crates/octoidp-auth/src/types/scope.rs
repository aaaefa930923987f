//! Scope definitions.

use serde::{Deserialize, Serialize};

use super::secret::Secret;

/// Whether a scope describes user identity data or an API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Identity,
    #[default]
    Resource,
}

/// A claim type emitted for a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeClaim {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Put this claim into the identity token even when an access token is issued.
    #[serde(default)]
    pub always_include_in_id_token: bool,
}

impl ScopeClaim {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            always_include_in_id_token: false,
        }
    }

    #[must_use]
    pub fn always_in_id_token(mut self) -> Self {
        self.always_include_in_id_token = true;
        self
    }
}

/// A scope definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scope {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub required: bool,
    pub emphasize: bool,
    pub scope_type: ScopeType,
    pub claims: Vec<ScopeClaim>,

    /// Emit every claim the user has, regardless of `claims`.
    pub include_all_claims_for_user: bool,

    pub show_in_discovery_document: bool,
    pub enabled: bool,

    /// Secrets a resource server uses to authenticate at the introspection endpoint.
    pub scope_secrets: Vec<Secret>,

    /// Introspection may return tokens that do not contain this scope.
    pub allow_unrestricted_introspection: bool,
}

impl Default for Scope {
    fn default() -> Self {
        Self {
            name: String::new(),
            display_name: None,
            description: None,
            required: false,
            emphasize: false,
            scope_type: ScopeType::Resource,
            claims: Vec::new(),
            include_all_claims_for_user: false,
            show_in_discovery_document: true,
            enabled: true,
            scope_secrets: Vec::new(),
            allow_unrestricted_introspection: false,
        }
    }
}

impl Scope {
    /// A resource scope with no claims.
    #[must_use]
    pub fn resource(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope_type: ScopeType::Resource,
            ..Self::default()
        }
    }

    /// An identity scope emitting `claims`.
    #[must_use]
    pub fn identity(name: impl Into<String>, claims: &[&str]) -> Self {
        Self {
            name: name.into(),
            scope_type: ScopeType::Identity,
            claims: claims.iter().map(|c| ScopeClaim::new(*c)).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.scope_type == ScopeType::Identity
    }

    #[must_use]
    pub fn claim_names(&self) -> impl Iterator<Item = &str> {
        self.claims.iter().map(|claim| claim.name.as_str())
    }
}

/// Scope names with protocol meaning.
pub mod scope_names {
    pub const OPENID: &str = "openid";
    pub const PROFILE: &str = "profile";
    pub const EMAIL: &str = "email";
    pub const PHONE: &str = "phone";
    pub const ADDRESS: &str = "address";
    pub const OFFLINE_ACCESS: &str = "offline_access";
}

/// The OpenID Connect standard scopes.
pub struct StandardScopes;

impl StandardScopes {
    #[must_use]
    pub fn open_id() -> Scope {
        Scope {
            required: true,
            claims: vec![ScopeClaim::new("sub").always_in_id_token()],
            ..Scope::identity(scope_names::OPENID, &[])
        }
    }

    #[must_use]
    pub fn profile() -> Scope {
        Scope::identity(
            scope_names::PROFILE,
            &[
                "name",
                "family_name",
                "given_name",
                "middle_name",
                "nickname",
                "preferred_username",
                "profile",
                "picture",
                "website",
                "gender",
                "birthdate",
                "zoneinfo",
                "locale",
                "updated_at",
            ],
        )
    }

    #[must_use]
    pub fn email() -> Scope {
        Scope::identity(scope_names::EMAIL, &["email", "email_verified"])
    }

    #[must_use]
    pub fn phone() -> Scope {
        Scope::identity(scope_names::PHONE, &["phone_number", "phone_number_verified"])
    }

    #[must_use]
    pub fn address() -> Scope {
        Scope::identity(scope_names::ADDRESS, &["address"])
    }

    /// Requests a refresh token. Treated as a resource scope without claims.
    #[must_use]
    pub fn offline_access() -> Scope {
        Scope {
            emphasize: true,
            ..Scope::resource(scope_names::OFFLINE_ACCESS)
        }
    }

    #[must_use]
    pub fn all() -> Vec<Scope> {
        vec![
            Self::open_id(),
            Self::profile(),
            Self::email(),
            Self::phone(),
            Self::address(),
            Self::offline_access(),
        ]
    }
}
