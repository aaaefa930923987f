//! Extension grants.
//!
//! A token request whose `grant_type` is not one of the built-in grants is
//! dispatched to the [`CustomGrantValidator`] registered for that string.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::{Client, RequestParameters, Subject};

/// Input of [`CustomGrantValidator::validate`].
#[derive(Debug, Clone, Copy)]
pub struct CustomGrantRequest<'a> {
    pub grant_type: &'a str,
    pub client: &'a Client,
    pub parameters: &'a RequestParameters,
    pub requested_scopes: &'a [String],
}

/// Outcome of a custom grant.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomGrantResult {
    /// The grant resolved to a subject.
    Success(Subject),
    /// The grant was rejected; the message becomes the `error_description`.
    Error { message: String },
}

#[async_trait]
pub trait CustomGrantValidator: Send + Sync {
    /// The `grant_type` value this validator handles.
    fn grant_type(&self) -> &str;

    async fn validate(&self, request: &CustomGrantRequest<'_>) -> AuthResult<CustomGrantResult>;
}

/// Validators keyed by grant type.
#[derive(Clone, Default)]
pub struct CustomGrantValidators {
    validators: HashMap<String, Arc<dyn CustomGrantValidator>>,
}

impl CustomGrantValidators {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a validator, replacing one with the same grant type.
    pub fn register(&mut self, validator: Arc<dyn CustomGrantValidator>) {
        self.validators
            .insert(validator.grant_type().to_string(), validator);
    }

    #[must_use]
    pub fn get(&self, grant_type: &str) -> Option<&Arc<dyn CustomGrantValidator>> {
        self.validators.get(grant_type)
    }

    #[must_use]
    pub fn contains(&self, grant_type: &str) -> bool {
        self.validators.contains_key(grant_type)
    }

    /// Registered grant types, sorted.
    #[must_use]
    pub fn grant_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.validators.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for CustomGrantValidators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomGrantValidators")
            .field("grant_types", &self.grant_types())
            .finish()
    }
}
