//! Type definitions for authentication data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::safe_format_key;

/// Kind of bearer token held by a [`Credential`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Session token from a browser or password login. Expires.
    #[default]
    Standard,
    /// Long-lived API key. Never treated as expired.
    ApiKey,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Standard => write!(f, "standard"),
            TokenKind::ApiKey => write!(f, "api_key"),
        }
    }
}

/// The persisted authentication record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Absent means the token never expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub token_kind: TokenKind,
    /// Stamped by the store on every write.
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Build an API-key credential. API keys carry no expiry.
    pub fn api_key(key: impl Into<String>, user: UserInfo) -> Self {
        Self {
            access_token: key.into(),
            refresh_token: None,
            user_id: user.id,
            email: user.email,
            expires_at: None,
            token_kind: TokenKind::ApiKey,
            saved_at: None,
        }
    }

    /// Build a standard credential from an identity exchange.
    pub fn from_token_result(result: TokenResult, user: UserInfo) -> Self {
        Self {
            access_token: result.access_token,
            refresh_token: result.refresh_token,
            user_id: user.id,
            email: user.email,
            expires_at: result.expires_at,
            token_kind: TokenKind::Standard,
            saved_at: None,
        }
    }

    /// Whether the credential must be treated as expired.
    ///
    /// API keys never expire regardless of `expires_at`.
    pub fn is_expired(&self) -> bool {
        if self.token_kind == TokenKind::ApiKey {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }

    /// Check if the token expires within the given threshold (in seconds).
    pub fn expires_soon(&self, threshold_secs: i64) -> bool {
        match self.time_until_expiry() {
            Some(remaining) => remaining < threshold_secs,
            None => false,
        }
    }

    /// Seconds until expiry, or `None` for tokens that never expire.
    pub fn time_until_expiry(&self) -> Option<i64> {
        if self.token_kind == TokenKind::ApiKey {
            return None;
        }
        self.expires_at
            .map(|exp| exp.timestamp() - Utc::now().timestamp())
    }

    /// Apply a refresh result, keeping the identity fields.
    pub fn refreshed(&self, result: TokenResult) -> Self {
        Self {
            access_token: result.access_token,
            refresh_token: result.refresh_token.or_else(|| self.refresh_token.clone()),
            user_id: self.user_id.clone(),
            email: self.email.clone(),
            expires_at: result.expires_at,
            token_kind: self.token_kind,
            saved_at: self.saved_at,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &safe_format_key(&self.access_token))
            .field(
                "refresh_token",
                &self.refresh_token.as_deref().map(|_| "***"),
            )
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("expires_at", &self.expires_at)
            .field("token_kind", &self.token_kind)
            .field("saved_at", &self.saved_at)
            .finish()
    }
}

/// User identity as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Tokens returned by a code exchange, refresh or password sign-in.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenResult {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Present when the provider returns the user alongside the tokens.
    pub user: Option<UserInfo>,
}

impl std::fmt::Debug for TokenResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResult")
            .field("access_token", &safe_format_key(&self.access_token))
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}
