//! Protocol events.
//!
//! An [`Event`] carries its details as a producer closure. The closure runs at
//! most once, inside the sink, and only for events that pass the configured
//! filter, so expensive detail payloads cost nothing when events are off.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;

use crate::clock::SharedClock;
use crate::config::EventsOptions;

/// Deferred computation of event details.
pub type DetailsProducer = Box<dyn FnOnce() -> Value + Send>;

/// Event ids.
pub mod ids {
    pub const LOCAL_LOGIN_SUCCESS: u32 = 1010;
    pub const LOCAL_LOGIN_FAILURE: u32 = 1011;
    pub const AUTHORIZE_REQUEST_FAILURE: u32 = 2010;
    pub const TOKEN_REQUEST_FAILURE: u32 = 2011;
    pub const AUTHORIZATION_CODE_ISSUED: u32 = 2020;
    pub const ACCESS_TOKEN_ISSUED: u32 = 2021;
    pub const IDENTITY_TOKEN_ISSUED: u32 = 2022;
    pub const REFRESH_TOKEN_ISSUED: u32 = 2023;
    pub const AUTHORIZATION_CODE_REDEEMED: u32 = 2024;
    pub const REFRESH_TOKEN_REFRESHED: u32 = 2030;
    pub const TOKEN_REVOKED: u32 = 2040;
    pub const UNHANDLED_ERROR: u32 = 3000;
}

/// Coarse grouping of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Authentication,
    TokenService,
    Information,
    Error,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "Authentication"),
            Self::TokenService => write!(f, "TokenService"),
            Self::Information => write!(f, "Information"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Outcome class of an event, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Success,
    Failure,
    Information,
    Error,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Failure => write!(f, "Failure"),
            Self::Information => write!(f, "Information"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// A single protocol event.
pub struct Event {
    pub id: u32,
    pub name: String,
    pub category: EventCategory,
    pub event_type: EventType,
    pub message: Option<String>,
    pub timestamp: OffsetDateTime,
    details: Option<DetailsProducer>,
}

impl Event {
    /// Creates an event without details.
    #[must_use]
    pub fn new(
        id: u32,
        name: impl Into<String>,
        category: EventCategory,
        event_type: EventType,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            category,
            event_type,
            message: None,
            timestamp,
            details: None,
        }
    }

    /// Sets the human readable message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches a details producer.
    #[must_use]
    pub fn with_details<F>(mut self, producer: F) -> Self
    where
        F: FnOnce() -> Value + Send + 'static,
    {
        self.details = Some(Box::new(producer));
        self
    }

    /// Evaluates the details producer. Later calls return `None`.
    pub fn take_details(&mut self) -> Option<Value> {
        self.details.take().map(|producer| producer())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("category", &self.category)
            .field("event_type", &self.event_type)
            .field("message", &self.message)
            .field("has_details", &self.details.is_some())
            .finish()
    }
}

/// Receiver of events.
pub trait EventSink: Send + Sync {
    /// Consumes an event. The sink decides whether to evaluate its details.
    fn raise(&self, event: Event);
}

/// Writes events as structured `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn raise(&self, mut event: Event) {
        let details = event
            .take_details()
            .map(|value| value.to_string())
            .unwrap_or_default();
        let message = event.message.as_deref().unwrap_or("");

        match event.event_type {
            EventType::Success | EventType::Information => tracing::info!(
                target: "octoidp::events",
                event_id = event.id,
                event_name = %event.name,
                event_category = %event.category,
                event_details = %details,
                "{message}"
            ),
            EventType::Failure => tracing::warn!(
                target: "octoidp::events",
                event_id = event.id,
                event_name = %event.name,
                event_category = %event.category,
                event_details = %details,
                "{message}"
            ),
            EventType::Error => tracing::error!(
                target: "octoidp::events",
                event_id = event.id,
                event_name = %event.name,
                event_category = %event.category,
                event_details = %details,
                "{message}"
            ),
        }
    }
}

/// Applies [`EventsOptions`] and builds the standard events.
#[derive(Clone)]
pub struct EventService {
    options: EventsOptions,
    sink: Arc<dyn EventSink>,
    clock: SharedClock,
}

impl EventService {
    #[must_use]
    pub fn new(options: EventsOptions, sink: Arc<dyn EventSink>, clock: SharedClock) -> Self {
        Self {
            options,
            sink,
            clock,
        }
    }

    fn enabled(&self, event_type: EventType) -> bool {
        match event_type {
            EventType::Success => self.options.raise_success_events,
            EventType::Failure => self.options.raise_failure_events,
            EventType::Information => self.options.raise_information_events,
            EventType::Error => self.options.raise_error_events,
        }
    }

    /// Forwards `event` to the sink if its type is enabled.
    ///
    /// Filtered events are dropped without evaluating their details.
    pub fn raise(&self, event: Event) {
        if self.enabled(event.event_type) {
            self.sink.raise(event);
        }
    }

    fn event(&self, id: u32, name: &str, category: EventCategory, event_type: EventType) -> Event {
        Event::new(id, name, category, event_type, self.clock.now())
    }

    pub fn local_login_success(&self, username: &str, subject_id: &str) {
        let username = username.to_string();
        let subject_id = subject_id.to_string();
        self.raise(
            self.event(
                ids::LOCAL_LOGIN_SUCCESS,
                "Local Login Success",
                EventCategory::Authentication,
                EventType::Success,
            )
            .with_details(move || serde_json::json!({ "username": username, "sub": subject_id })),
        );
    }

    pub fn local_login_failure(&self, username: &str, reason: &str) {
        let username = username.to_string();
        self.raise(
            self.event(
                ids::LOCAL_LOGIN_FAILURE,
                "Local Login Failure",
                EventCategory::Authentication,
                EventType::Failure,
            )
            .with_message(reason)
            .with_details(move || serde_json::json!({ "username": username })),
        );
    }

    /// Failed authorize request. `details` typically renders the scrubbed
    /// raw parameters.
    pub fn authorize_request_failure<F>(&self, error: &str, details: F)
    where
        F: FnOnce() -> Value + Send + 'static,
    {
        self.raise(
            self.event(
                ids::AUTHORIZE_REQUEST_FAILURE,
                "Authorize Request Failure",
                EventCategory::TokenService,
                EventType::Failure,
            )
            .with_message(error)
            .with_details(details),
        );
    }

    pub fn token_request_failure<F>(&self, error: &str, details: F)
    where
        F: FnOnce() -> Value + Send + 'static,
    {
        self.raise(
            self.event(
                ids::TOKEN_REQUEST_FAILURE,
                "Token Request Failure",
                EventCategory::TokenService,
                EventType::Failure,
            )
            .with_message(error)
            .with_details(details),
        );
    }

    pub fn authorization_code_issued(&self, client_id: &str, subject_id: &str, scopes: &[String]) {
        let details = serde_json::json!({
            "client_id": client_id,
            "sub": subject_id,
            "scopes": scopes,
        });
        self.raise(
            self.event(
                ids::AUTHORIZATION_CODE_ISSUED,
                "Authorization Code Issued",
                EventCategory::TokenService,
                EventType::Information,
            )
            .with_details(move || details),
        );
    }

    pub fn authorization_code_redeemed(&self, client_id: &str, subject_id: &str) {
        let details = serde_json::json!({
            "client_id": client_id,
            "sub": subject_id,
        });
        self.raise(
            self.event(
                ids::AUTHORIZATION_CODE_REDEEMED,
                "Authorization Code Redeemed",
                EventCategory::TokenService,
                EventType::Information,
            )
            .with_details(move || details),
        );
    }

    /// Issued access or identity token. Details are the token's claim set.
    pub fn token_issued<F>(&self, identity_token: bool, client_id: &str, details: F)
    where
        F: FnOnce() -> Value + Send + 'static,
    {
        let (id, name) = if identity_token {
            (ids::IDENTITY_TOKEN_ISSUED, "Identity Token Issued")
        } else {
            (ids::ACCESS_TOKEN_ISSUED, "Access Token Issued")
        };
        self.raise(
            self.event(id, name, EventCategory::TokenService, EventType::Information)
                .with_message(format!("client {client_id}"))
                .with_details(details),
        );
    }

    pub fn refresh_token_issued(&self, client_id: &str, subject_id: &str, lifetime: u64) {
        let details = serde_json::json!({
            "client_id": client_id,
            "sub": subject_id,
            "lifetime": lifetime,
        });
        self.raise(
            self.event(
                ids::REFRESH_TOKEN_ISSUED,
                "Refresh Token Issued",
                EventCategory::TokenService,
                EventType::Information,
            )
            .with_details(move || details),
        );
    }

    pub fn refresh_token_refreshed(&self, client_id: &str, version: u32, rotated: bool) {
        let details = serde_json::json!({
            "client_id": client_id,
            "version": version,
            "rotated": rotated,
        });
        self.raise(
            self.event(
                ids::REFRESH_TOKEN_REFRESHED,
                "Refresh Token Refreshed",
                EventCategory::TokenService,
                EventType::Success,
            )
            .with_details(move || details),
        );
    }

    pub fn token_revoked(&self, client_id: &str, token_kind: &str) {
        self.raise(
            self.event(
                ids::TOKEN_REVOKED,
                "Token Revoked",
                EventCategory::TokenService,
                EventType::Success,
            )
            .with_message(format!("{token_kind} revoked by client {client_id}")),
        );
    }

    pub fn unhandled_error(&self, error: &crate::error::AuthError) {
        self.raise(
            self.event(
                ids::UNHANDLED_ERROR,
                "Unhandled Error",
                EventCategory::Error,
                EventType::Error,
            )
            .with_message(error.to_string()),
        );
    }
}

impl fmt::Debug for EventService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventService")
            .field("options", &self.options)
            .finish()
    }
}
