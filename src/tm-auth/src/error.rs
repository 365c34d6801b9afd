//! Error taxonomy for authentication operations.

use std::time::Duration;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors surfaced by login, refresh and persistence operations.
///
/// Every variant maps to a stable machine-readable code via [`AuthError::code`].
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Configuration missing or invalid: {0}")]
    ConfigMissing(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("OAuth error from provider: {error} - {description}")]
    OAuthDenied { error: String, description: String },
    #[error("CSRF protection: state parameter mismatch")]
    StateMismatch,
    #[error("Authentication timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
    #[error("Authentication was cancelled")]
    Cancelled,
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),
    #[error("Missing required callback parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Stored credential has no refresh token")]
    NoRefreshToken,
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Failed to save credentials: {0}")]
    SaveFailed(String),
    #[error("Failed to parse credentials: {0}")]
    ParseFailed(String),
}

impl AuthError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::ConfigMissing(_) => "CONFIG_MISSING",
            AuthError::Network(_) => "NETWORK_ERROR",
            AuthError::OAuthDenied { .. } => "OAUTH_DENIED",
            AuthError::StateMismatch => "STATE_MISMATCH",
            AuthError::Timeout(_) => "AUTH_TIMEOUT",
            AuthError::Cancelled => "AUTH_CANCELLED",
            AuthError::TokenExchangeFailed(_) => "TOKEN_EXCHANGE_FAILED",
            AuthError::MissingParameter(_) => "INVALID_CALLBACK",
            AuthError::NoRefreshToken => "NO_REFRESH_TOKEN",
            AuthError::NotAuthenticated => "NOT_AUTHENTICATED",
            AuthError::SaveFailed(_) => "SAVE_FAILED",
            AuthError::ParseFailed(_) => "PARSE_FAILED",
        }
    }

    /// Whether retrying the same request could succeed.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, AuthError::Network(_))
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AuthError::TokenExchangeFailed(format!("invalid response body: {err}"))
        } else {
            AuthError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(AuthError::StateMismatch.code(), "STATE_MISMATCH");
        assert_eq!(
            AuthError::Timeout(Duration::from_secs(300)).code(),
            "AUTH_TIMEOUT"
        );
        assert_eq!(AuthError::NoRefreshToken.code(), "NO_REFRESH_TOKEN");
        assert_eq!(AuthError::MissingParameter("code").code(), "INVALID_CALLBACK");
    }

    #[test]
    fn test_timeout_message() {
        let err = AuthError::Timeout(Duration::from_secs(300));
        assert_eq!(err.to_string(), "Authentication timed out after 300 seconds");
    }

    #[test]
    fn test_denied_message_carries_provider_fields() {
        let err = AuthError::OAuthDenied {
            error: "access_denied".to_string(),
            description: "user declined".to_string(),
        };
        assert!(err.to_string().contains("access_denied"));
        assert!(err.to_string().contains("user declined"));
    }
}
