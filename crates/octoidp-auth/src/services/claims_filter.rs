//! Claim transformation by identity provider.
//!
//! Filters run on profile claims before they are put into tokens. They are
//! plain values composed with [`AggregateClaimsFilter`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::Claim;

/// Transforms the claims that came from `provider`.
pub trait ClaimsFilter: Send + Sync {
    fn filter(&self, provider: &str, claims: Vec<Claim>) -> Vec<Claim>;
}

/// Applies filters in order.
#[derive(Clone, Default)]
pub struct AggregateClaimsFilter {
    filters: Vec<Arc<dyn ClaimsFilter>>,
}

impl AggregateClaimsFilter {
    #[must_use]
    pub fn new(filters: Vec<Arc<dyn ClaimsFilter>>) -> Self {
        Self { filters }
    }

    #[must_use]
    pub fn with(mut self, filter: impl ClaimsFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl ClaimsFilter for AggregateClaimsFilter {
    fn filter(&self, provider: &str, claims: Vec<Claim>) -> Vec<Claim> {
        self.filters
            .iter()
            .fold(claims, |claims, filter| filter.filter(provider, claims))
    }
}

impl std::fmt::Debug for AggregateClaimsFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateClaimsFilter")
            .field("filters", &self.filters.len())
            .finish()
    }
}

/// Drops claim types, optionally only for one provider.
#[derive(Debug, Clone)]
pub struct ExcludeClaimTypesFilter {
    provider: Option<String>,
    claim_types: Vec<String>,
}

impl ExcludeClaimTypesFilter {
    #[must_use]
    pub fn new(claim_types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            provider: None,
            claim_types: claim_types.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn for_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

impl ClaimsFilter for ExcludeClaimTypesFilter {
    fn filter(&self, provider: &str, mut claims: Vec<Claim>) -> Vec<Claim> {
        if self.provider.as_deref().is_some_and(|p| p != provider) {
            return claims;
        }
        claims.retain(|claim| !self.claim_types.contains(&claim.claim_type));
        claims
    }
}

/// Renames claim types, optionally only for one provider.
#[derive(Debug, Clone, Default)]
pub struct RenameClaimTypesFilter {
    provider: Option<String>,
    renames: HashMap<String, String>,
}

impl RenameClaimTypesFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }

    #[must_use]
    pub fn for_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

impl ClaimsFilter for RenameClaimTypesFilter {
    fn filter(&self, provider: &str, claims: Vec<Claim>) -> Vec<Claim> {
        if self.provider.as_deref().is_some_and(|p| p != provider) {
            return claims;
        }
        claims
            .into_iter()
            .map(|mut claim| {
                if let Some(renamed) = self.renames.get(&claim.claim_type) {
                    claim.claim_type = renamed.clone();
                }
                claim
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Vec<Claim> {
        vec![
            Claim::new("email", "a@example.com"),
            Claim::new("urn:oid:0.9.2342.19200300.100.1.1", "alice"),
            Claim::new("internal_id", "42"),
        ]
    }

    #[test]
    fn test_filters_apply_in_order() {
        let aggregate = AggregateClaimsFilter::default()
            .with(RenameClaimTypesFilter::new().rename("urn:oid:0.9.2342.19200300.100.1.1", "uid"))
            .with(ExcludeClaimTypesFilter::new(["internal_id", "uid"]));

        let filtered = aggregate.filter("idsrv", claims());
        assert_eq!(filtered, vec![Claim::new("email", "a@example.com")]);
    }

    #[test]
    fn test_provider_scoped_filter() {
        let filter = ExcludeClaimTypesFilter::new(["email"]).for_provider("google");
        assert_eq!(filter.filter("idsrv", claims()).len(), 3);
        assert_eq!(filter.filter("google", claims()).len(), 2);
    }

    #[test]
    fn test_empty_aggregate_is_identity() {
        let aggregate = AggregateClaimsFilter::default();
        assert!(aggregate.is_empty());
        assert_eq!(aggregate.filter("idsrv", claims()), claims());
    }
}
