//! Error types for oauth2-engine.

use thiserror::Error;

/// Errors surfaced by the authorization engine, the request authorizer and
/// their collaborators.
///
/// The type is `Clone` so that a single refresh result can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OAuthError {
    #[error("An authorization flow is already in progress")]
    AlreadyInProgress,

    #[error("OAuth state mismatch")]
    StateMismatch,

    #[error("Authorization denied: {error}{}", description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("Authorization expired")]
    AuthorizationExpired,

    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Access token expired and cannot be refreshed")]
    TokenExpired,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Authorization cancelled")]
    Cancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid redirect: {0}")]
    InvalidRedirect(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OAuthError {
    /// Build an `AuthorizationDenied` from a provider `error` code.
    pub fn denied(error: impl Into<String>, description: Option<String>) -> Self {
        Self::AuthorizationDenied {
            error: error.into(),
            description,
        }
    }

    /// Whether the caller has to run a new authorization flow to recover.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated
                | Self::TokenExpired
                | Self::RefreshFailed(_)
                | Self::AuthorizationExpired
                | Self::AuthorizationDenied { .. }
        )
    }

    /// Whether the failure came from the network collaborator and may
    /// succeed if the caller tries again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<reqwest::Error> for OAuthError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for OAuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for OAuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for OAuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for OAuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<url::ParseError> for OAuthError {
    fn from(error: url::ParseError) -> Self {
        Self::Configuration(format!("invalid URL: {error}"))
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, OAuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denied_display_includes_description() {
        let err = OAuthError::denied("access_denied", Some("user said no".to_string()));
        assert_eq!(
            err.to_string(),
            "Authorization denied: access_denied (user said no)"
        );
    }

    #[test]
    fn denied_display_without_description() {
        let err = OAuthError::denied("access_denied", None);
        assert_eq!(err.to_string(), "Authorization denied: access_denied");
    }

    #[test]
    fn reauthorization_classification() {
        assert!(OAuthError::TokenExpired.requires_reauthorization());
        assert!(OAuthError::RefreshFailed("boom".into()).requires_reauthorization());
        assert!(!OAuthError::AlreadyInProgress.requires_reauthorization());
        assert!(!OAuthError::Network("reset".into()).requires_reauthorization());
    }

    #[test]
    fn only_network_errors_are_transient() {
        assert!(OAuthError::Network("timeout".into()).is_transient());
        assert!(!OAuthError::Cancelled.is_transient());
        assert!(!OAuthError::InvalidTokenResponse("x".into()).is_transient());
    }

    #[test]
    fn url_parse_error_maps_to_configuration() {
        let err: OAuthError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, OAuthError::Configuration(_)));
    }
}
