//! Protocol and infrastructure error types.
//!
//! Every validation failure in the engine is a typed [`AuthError`] value. The
//! OAuth2 wire code is derived with [`AuthError::oauth_error_code`]; transport
//! layers decide how to deliver it (redirect, local page, JSON body).

use std::fmt;

/// Errors produced while validating protocol requests or issuing tokens.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The request is missing a parameter, or a parameter is malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The client is not allowed to use the requested flow or grant.
    #[error("Unauthorized client: {message}")]
    UnauthorizedClient {
        /// Description of why the client is not authorized.
        message: String,
    },

    /// The response_type is missing or not supported.
    #[error("Unsupported response type: {response_type}")]
    UnsupportedResponseType {
        /// The offending response type.
        response_type: String,
    },

    /// The grant_type is unknown.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The offending grant type.
        grant_type: String,
    },

    /// The token_type_hint given to the revocation endpoint is unknown.
    #[error("Unsupported token type: {token_type}")]
    UnsupportedTokenType {
        /// The offending hint.
        token_type: String,
    },

    /// A requested scope is unknown, disabled or not allowed for the client.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of why the scope is invalid.
        message: String,
    },

    /// The authorization code, refresh token or resource owner credentials are invalid.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// Client authentication failed.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// The presented token does not carry the required scope.
    #[error("Insufficient scope: {message}")]
    InsufficientScope {
        /// Description of the missing scope.
        message: String,
    },

    /// The presented token is past its expiry instant.
    #[error("Token expired")]
    TokenExpired,

    /// The presented token is malformed, unknown, or fails verification.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// The resource owner or the server denied the request.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description of why access was denied.
        message: String,
    },

    /// `prompt=none` was requested but the user must log in.
    #[error("Login required")]
    LoginRequired,

    /// `prompt=none` was requested but the user must consent.
    #[error("Consent required")]
    ConsentRequired,

    /// A store collaborator failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// Signing or key handling failed.
    #[error("Signing error: {message}")]
    Signing {
        /// Description of the signing error.
        message: String,
    },

    /// The identity provider configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// The inbound request was cancelled before the operation finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `UnauthorizedClient` error.
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::UnauthorizedClient {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedResponseType` error.
    #[must_use]
    pub fn unsupported_response_type(response_type: impl Into<String>) -> Self {
        Self::UnsupportedResponseType {
            response_type: response_type.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `UnsupportedTokenType` error.
    #[must_use]
    pub fn unsupported_token_type(token_type: impl Into<String>) -> Self {
        Self::UnsupportedTokenType {
            token_type: token_type.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `InsufficientScope` error.
    #[must_use]
    pub fn insufficient_scope(message: impl Into<String>) -> Self {
        Self::InsufficientScope {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Signing` error.
    #[must_use]
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the caller sent something the server rejects.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if the failure happened on the server side (`server_error`).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. }
                | Self::Signing { .. }
                | Self::Configuration { .. }
                | Self::Cancelled
                | Self::Internal { .. }
        )
    }

    /// Returns `true` for failures of an inbound token presentation.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidToken { .. } | Self::TokenExpired | Self::InsufficientScope { .. }
        )
    }

    /// Returns the error category for logging.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest { .. }
            | Self::UnsupportedResponseType { .. }
            | Self::UnsupportedGrantType { .. }
            | Self::UnsupportedTokenType { .. } => ErrorCategory::Validation,
            Self::InvalidClient { .. } | Self::InvalidGrant { .. } => ErrorCategory::Authentication,
            Self::UnauthorizedClient { .. }
            | Self::InvalidScope { .. }
            | Self::AccessDenied { .. } => ErrorCategory::Authorization,
            Self::LoginRequired | Self::ConsentRequired => ErrorCategory::Interaction,
            Self::InsufficientScope { .. } | Self::TokenExpired | Self::InvalidToken { .. } => {
                ErrorCategory::Token
            }
            Self::Storage { .. } | Self::Cancelled => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Signing { .. } | Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the OAuth 2.0 / OpenID Connect error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::UnauthorizedClient { .. } => "unauthorized_client",
            Self::UnsupportedResponseType { .. } => "unsupported_response_type",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::UnsupportedTokenType { .. } => "unsupported_token_type",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::InvalidClient { .. } => "invalid_client",
            Self::InsufficientScope { .. } => "insufficient_scope",
            Self::TokenExpired => "expired_token",
            Self::InvalidToken { .. } => "invalid_token",
            Self::AccessDenied { .. } => "access_denied",
            Self::LoginRequired => "login_required",
            Self::ConsentRequired => "consent_required",
            Self::Storage { .. }
            | Self::Signing { .. }
            | Self::Configuration { .. }
            | Self::Cancelled
            | Self::Internal { .. } => "server_error",
        }
    }

    /// Returns the `error_description` safe to send to the caller.
    ///
    /// Server-side failures never expose their message.
    #[must_use]
    pub fn public_description(&self) -> Option<String> {
        match self {
            Self::InvalidRequest { message }
            | Self::UnauthorizedClient { message }
            | Self::InvalidScope { message }
            | Self::InvalidGrant { message }
            | Self::InvalidClient { message }
            | Self::InsufficientScope { message }
            | Self::InvalidToken { message }
            | Self::AccessDenied { message } => Some(message.clone()),
            Self::UnsupportedResponseType { .. }
            | Self::UnsupportedGrantType { .. }
            | Self::UnsupportedTokenType { .. }
            | Self::TokenExpired
            | Self::LoginRequired
            | Self::ConsentRequired => None,
            Self::Storage { .. }
            | Self::Signing { .. }
            | Self::Configuration { .. }
            | Self::Cancelled
            | Self::Internal { .. } => None,
        }
    }
}

/// Categories of errors for logging and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Client or resource owner authentication failed.
    Authentication,
    /// The caller is not allowed to do what it asked.
    Authorization,
    /// Inbound token presentation failed.
    Token,
    /// Malformed or unsupported request.
    Validation,
    /// User interaction is needed but was not allowed.
    Interaction,
    /// A collaborator failed.
    Infrastructure,
    /// Bad configuration.
    Configuration,
    /// Everything else on the server side.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Token => write!(f, "token"),
            Self::Validation => write!(f, "validation"),
            Self::Interaction => write!(f, "interaction"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::invalid_client("client not found");
        assert_eq!(err.to_string(), "Invalid client: client not found");

        let err = AuthError::invalid_grant("code already redeemed");
        assert_eq!(err.to_string(), "Invalid grant: code already redeemed");

        assert_eq!(AuthError::TokenExpired.to_string(), "Token expired");
    }

    #[test]
    fn test_oauth_error_code() {
        assert_eq!(
            AuthError::invalid_request("x").oauth_error_code(),
            "invalid_request"
        );
        assert_eq!(
            AuthError::unauthorized_client("x").oauth_error_code(),
            "unauthorized_client"
        );
        assert_eq!(
            AuthError::unsupported_response_type("token").oauth_error_code(),
            "unsupported_response_type"
        );
        assert_eq!(
            AuthError::insufficient_scope("read").oauth_error_code(),
            "insufficient_scope"
        );
        assert_eq!(AuthError::TokenExpired.oauth_error_code(), "expired_token");
        assert_eq!(AuthError::Cancelled.oauth_error_code(), "server_error");
        assert_eq!(
            AuthError::storage("down").oauth_error_code(),
            "server_error"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(AuthError::invalid_scope("x").is_client_error());
        assert!(!AuthError::invalid_scope("x").is_server_error());
        assert!(AuthError::storage("x").is_server_error());
        assert!(AuthError::Cancelled.is_server_error());
        assert!(AuthError::TokenExpired.is_token_error());
        assert!(!AuthError::invalid_grant("x").is_token_error());
    }

    #[test]
    fn test_server_errors_hide_description() {
        assert_eq!(
            AuthError::storage("connection refused to 10.0.0.5").public_description(),
            None
        );
        assert_eq!(
            AuthError::invalid_scope("unknown scope").public_description(),
            Some("unknown scope".to_string())
        );
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            AuthError::invalid_client("x").category(),
            ErrorCategory::Authentication
        );
        assert_eq!(AuthError::TokenExpired.category(), ErrorCategory::Token);
        assert_eq!(AuthError::LoginRequired.category(), ErrorCategory::Interaction);
        assert_eq!(ErrorCategory::Infrastructure.to_string(), "infrastructure");
    }
}
