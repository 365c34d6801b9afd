//! Identity provider boundary.
//!
//! The OAuth controller and the manager talk to the remote provider only
//! through [`IdentityClient`]. [`HttpIdentityClient`] is the production
//! implementation; tests inject fakes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::USER_AGENT;
use crate::error::{AuthError, Result};
use crate::types::{TokenResult, UserInfo};

/// Default timeout for HTTP requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of retries for token exchange requests.
const EXCHANGE_MAX_RETRIES: u32 = 3;

/// Initial delay between exchange retries; doubles per attempt.
const EXCHANGE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Network operations against the identity provider.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, code: &str) -> Result<TokenResult>;

    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResult>;

    /// Sign in directly with an identifier and secret.
    async fn sign_in_with_password(&self, identifier: &str, secret: &str) -> Result<TokenResult>;

    /// Validate an API key and return the user it belongs to.
    async fn validate_api_key(&self, key: &str) -> Result<UserInfo>;

    /// Look up the user owning an access token.
    async fn get_user(&self, access_token: &str) -> Result<UserInfo>;

    /// Revoke the session behind an access token.
    async fn sign_out(&self, access_token: &str) -> Result<()>;
}

/// Token response from the identity API.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<String>,
    #[serde(default)]
    user: Option<UserInfo>,
}

impl TokenResponse {
    fn into_result(self) -> Result<TokenResult> {
        if self.access_token.is_empty() {
            return Err(AuthError::TokenExchangeFailed(
                "response contained an empty access token".to_string(),
            ));
        }
        let expires_at = resolve_expiry(self.expires_in, self.expires_at.as_deref())?;
        Ok(TokenResult {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_at,
            user: self.user,
        })
    }
}

#[derive(Serialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
enum TokenRequest<'a> {
    AuthorizationCode { code: &'a str },
    RefreshToken { refresh_token: &'a str },
    Password { email: &'a str, password: &'a str },
}

/// Resolve an absolute expiry from `expires_in` seconds or an RFC 3339
/// `expires_at`. `expires_at` wins when both are present.
pub(crate) fn resolve_expiry(
    expires_in: Option<i64>,
    expires_at: Option<&str>,
) -> Result<Option<DateTime<Utc>>> {
    if let Some(raw) = expires_at.filter(|s| !s.is_empty()) {
        let parsed = DateTime::parse_from_rfc3339(raw).map_err(|e| {
            AuthError::TokenExchangeFailed(format!("invalid expires_at '{raw}': {e}"))
        })?;
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    Ok(expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs)))
}

/// reqwest-backed [`IdentityClient`].
#[derive(Debug, Clone)]
pub struct HttpIdentityClient {
    client: Client,
    api_base_url: String,
    retry_delay: Duration,
}

impl HttpIdentityClient {
    pub fn new(api_base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(DEFAULT_TIMEOUT)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| AuthError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            retry_delay: EXCHANGE_RETRY_DELAY,
        })
    }

    /// Override the initial retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base_url)
    }

    /// POST a token request, retrying transient failures.
    ///
    /// Retries on connection errors, timeouts, and 5xx server errors.
    /// Does not retry on 4xx client errors.
    async fn request_token(&self, path: &str, body: &TokenRequest<'_>) -> Result<TokenResult> {
        let url = self.url(path);
        let mut delay = self.retry_delay;

        for attempt in 0..=EXCHANGE_MAX_RETRIES {
            if attempt > 0 {
                debug!(
                    attempt = attempt + 1,
                    max_attempts = EXCHANGE_MAX_RETRIES + 1,
                    "Retrying token request"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }

            match self.try_request_token(&url, body).await {
                Ok(token) => return Ok(token),
                Err(e) if e.is_transient() && attempt < EXCHANGE_MAX_RETRIES => {
                    warn!(url = %url, error = %e, "Token request failed, will retry");
                }
                Err(e) => return Err(e),
            }
        }

        Err(AuthError::Network(format!(
            "token request to {url} failed after {} attempts",
            EXCHANGE_MAX_RETRIES + 1
        )))
    }

    async fn try_request_token(&self, url: &str, body: &TokenRequest<'_>) -> Result<TokenResult> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();

        if status.is_server_error() {
            return Err(AuthError::Network(format!("server returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenExchangeFailed(format!("{status} - {body}")));
        }

        let token: TokenResponse = response.json().await?;
        token.into_result()
    }

    async fn get_authorized<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        bearer: &str,
    ) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(bearer)
            .send()
            .await?;
        let status = response.status();

        match status {
            s if s.is_success() => Ok(response.json().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::NotAuthenticated),
            s if s.is_server_error() => Err(AuthError::Network(format!("server returned {s}"))),
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(AuthError::TokenExchangeFailed(format!("{s} - {body}")))
            }
        }
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenResult> {
        self.request_token("/auth/token", &TokenRequest::AuthorizationCode { code })
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResult> {
        self.request_token(
            "/auth/token/refresh",
            &TokenRequest::RefreshToken { refresh_token },
        )
        .await
    }

    async fn sign_in_with_password(&self, identifier: &str, secret: &str) -> Result<TokenResult> {
        self.request_token(
            "/auth/sign-in",
            &TokenRequest::Password {
                email: identifier,
                password: secret,
            },
        )
        .await
    }

    async fn validate_api_key(&self, key: &str) -> Result<UserInfo> {
        match self.get_authorized("/auth/api-keys/validate", key).await {
            Err(AuthError::NotAuthenticated) => Err(AuthError::TokenExchangeFailed(
                "API key was rejected".to_string(),
            )),
            other => other,
        }
    }

    async fn get_user(&self, access_token: &str) -> Result<UserInfo> {
        self.get_authorized("/auth/user", access_token).await
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/auth/sign-out"))
            .bearer_auth(access_token)
            .send()
            .await?;

        if response.status().is_success() || response.status() == StatusCode::UNAUTHORIZED {
            Ok(())
        } else {
            Err(AuthError::Network(format!(
                "sign-out returned {}",
                response.status()
            )))
        }
    }
}
