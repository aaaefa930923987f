//! Raw protocol parameters.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Parameters whose values never leave the process unmasked.
pub const SENSITIVE_PARAMETERS: &[&str] = &["password", "assertion", "client_secret", "client_assertion"];

const MASK: &str = "***";

/// The raw form or query parameters of a request.
///
/// `Debug` output and [`RequestParameters::scrubbed`] mask the values of
/// [`SENSITIVE_PARAMETERS`].
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestParameters(BTreeMap<String, String>);

impl RequestParameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of `name`, treating an empty or blank value as absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A copy with sensitive values masked, safe for logs and events.
    #[must_use]
    pub fn scrubbed(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(name, value)| {
                let value = if SENSITIVE_PARAMETERS.contains(&name.as_str()) {
                    MASK.to_string()
                } else {
                    value.clone()
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// Scrubbed parameters as a JSON object.
    #[must_use]
    pub fn to_scrubbed_json(&self) -> serde_json::Value {
        serde_json::to_value(self.scrubbed()).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Debug for RequestParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.scrubbed()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for RequestParameters
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_values_are_masked() {
        let params: RequestParameters = [
            ("grant_type", "password"),
            ("username", "bob"),
            ("password", "hunter2"),
            ("client_secret", "s3cr3t"),
            ("client_assertion", "eyJ..."),
            ("assertion", "eyJ..."),
        ]
        .into_iter()
        .collect();

        let debug = format!("{params:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("s3cr3t"));
        assert!(!debug.contains("eyJ"));
        assert!(debug.contains("bob"));

        let scrubbed = params.scrubbed();
        assert_eq!(scrubbed["password"], "***");
        assert_eq!(scrubbed["grant_type"], "password");
        assert_eq!(params.get("password"), Some("hunter2"));
    }

    #[test]
    fn test_blank_values_are_absent() {
        let params = RequestParameters::new().with("scope", " ").with("state", "xyz");
        assert_eq!(params.get("scope"), None);
        assert!(!params.contains("scope"));
        assert_eq!(params.get("state"), Some("xyz"));
    }
}
