//! Process-wide authentication facade.
//!
//! [`AuthManager`] is the single point of truth other subsystems use to log
//! in, read credentials and build request headers. It can be constructed
//! directly with injected collaborators, or obtained through
//! [`get_instance`] which lazily builds one from the resolved
//! configuration and keeps it for the rest of the process.

use std::sync::{Arc, Mutex as StdMutex};

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::browser::{BrowserLauncher, SystemBrowser};
use crate::config::AuthConfig;
use crate::constants::{AUTH_TOKEN_ENV_VAR, REFRESH_THRESHOLD_SECS};
use crate::error::{AuthError, Result};
use crate::identity::{HttpIdentityClient, IdentityClient};
use crate::oauth::{AuthenticateOptions, OAuthFlowController};
use crate::store::CredentialStore;
use crate::types::{Credential, TokenKind, UserInfo};
use crate::utils::safe_format_key;

static INSTANCE: StdMutex<Option<Arc<AuthManager>>> = StdMutex::new(None);

/// Get the process-wide manager, creating it on first use.
///
/// The first call's configuration wins. A later call with a different
/// configuration is ignored with a warning.
pub fn get_instance(config: Option<AuthConfig>) -> Result<Arc<AuthManager>> {
    let mut slot = INSTANCE.lock().unwrap_or_else(|e| e.into_inner());

    if let Some(existing) = slot.as_ref() {
        if let Some(requested) = config {
            if requested != existing.config {
                warn!(
                    requested_file = %requested.config_file.display(),
                    active_file = %existing.config.config_file.display(),
                    "AuthManager already initialized; ignoring new configuration"
                );
            }
        }
        return Ok(existing.clone());
    }

    let config = match config {
        Some(config) => {
            config.validate()?;
            config
        }
        None => AuthConfig::resolve()?,
    };
    let identity = HttpIdentityClient::new(config.api_base_url.clone())?;
    let manager = Arc::new(AuthManager::new(
        config,
        Arc::new(identity),
        Arc::new(SystemBrowser),
    ));
    *slot = Some(manager.clone());
    Ok(manager)
}

/// Drop the process-wide manager so the next [`get_instance`] builds a
/// fresh one. Intended for tests.
pub fn reset_instance() {
    let mut slot = INSTANCE.lock().unwrap_or_else(|e| e.into_inner());
    if slot.take().is_some() {
        debug!("AuthManager instance reset");
    }
}

/// Composes the credential store, identity client and OAuth flow.
pub struct AuthManager {
    config: AuthConfig,
    store: CredentialStore,
    identity: Arc<dyn IdentityClient>,
    browser: Arc<dyn BrowserLauncher>,
    /// Serializes login, refresh and logout within this process.
    write_lock: Mutex<()>,
}

impl AuthManager {
    pub fn new(
        config: AuthConfig,
        identity: Arc<dyn IdentityClient>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let store = CredentialStore::new(config.config_file.clone());
        Self {
            config,
            store,
            identity,
            browser,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Current credential, or `None` when signed out or expired.
    ///
    /// A non-empty `TM_AUTH_TOKEN` takes precedence over the file.
    pub async fn get_credentials(&self) -> Option<Credential> {
        if let Some(credential) = env_credential() {
            return Some(credential);
        }
        self.store.get(false).await
    }

    /// Run the browser flow and persist the resulting credential.
    ///
    /// The write lock is only taken for the save, not the interactive wait.
    pub async fn authenticate_with_oauth(&self, options: AuthenticateOptions) -> Result<Credential> {
        let controller = OAuthFlowController::new(
            self.config.clone(),
            self.identity.clone(),
            self.browser.clone(),
        );
        let credential = controller.authenticate(options).await?;

        let _guard = self.write_lock.lock().await;
        let saved = self.store.save(&credential).await?;
        info!(user_id = %saved.user_id, "Logged in via browser");
        Ok(saved)
    }

    /// Sign in with an identifier and secret and persist the result.
    pub async fn authenticate_with_credentials(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<Credential> {
        let _guard = self.write_lock.lock().await;

        let token = self.identity.sign_in_with_password(identifier, secret).await?;
        let user = match token.user.clone() {
            Some(user) => user,
            None => self.identity.get_user(&token.access_token).await?,
        };
        let saved = self
            .store
            .save(&Credential::from_token_result(token, user))
            .await?;
        info!(user_id = %saved.user_id, "Logged in with credentials");
        Ok(saved)
    }

    /// Validate an API key and persist it as a non-expiring credential.
    pub async fn authenticate_with_api_key(&self, key: &str) -> Result<Credential> {
        let key = key.trim();
        if key.is_empty() {
            return Err(AuthError::TokenExchangeFailed("API key is empty".to_string()));
        }
        let _guard = self.write_lock.lock().await;

        let user: UserInfo = self.identity.validate_api_key(key).await?;
        let saved = self.store.save(&Credential::api_key(key, user)).await?;
        info!(
            user_id = %saved.user_id,
            key = %safe_format_key(key),
            "Logged in with API key"
        );
        Ok(saved)
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Identity fields of the stored record are preserved.
    pub async fn refresh_token(&self) -> Result<Credential> {
        let _guard = self.write_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<Credential> {
        let current = self
            .store
            .get(true)
            .await
            .ok_or(AuthError::NotAuthenticated)?;
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or(AuthError::NoRefreshToken)?;

        let token = self.identity.refresh(refresh_token).await?;
        let saved = self.store.save(&current.refreshed(token)).await?;
        info!(user_id = %saved.user_id, expires_at = ?saved.expires_at, "Refreshed access token");
        Ok(saved)
    }

    /// A usable bearer token, refreshing first when the stored token is
    /// expired or about to expire.
    pub async fn get_access_token(&self) -> Result<String> {
        if let Some(credential) = env_credential() {
            return Ok(credential.access_token);
        }

        let Some(current) = self.store.get(true).await else {
            return Err(AuthError::NotAuthenticated);
        };
        let needs_refresh = current.token_kind == TokenKind::Standard
            && current.expires_soon(REFRESH_THRESHOLD_SECS);
        if !needs_refresh {
            return Ok(current.access_token);
        }

        if current.refresh_token.is_none() {
            return if current.is_expired() {
                Err(AuthError::NotAuthenticated)
            } else {
                Ok(current.access_token)
            };
        }

        debug!(expires_at = ?current.expires_at, "Access token expiring, attempting refresh");
        let _guard = self.write_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(latest) = self.store.get(true).await {
            if !latest.expires_soon(REFRESH_THRESHOLD_SECS) {
                return Ok(latest.access_token);
            }
        }

        match self.refresh_locked().await {
            Ok(refreshed) => Ok(refreshed.access_token),
            Err(e) if !current.is_expired() => {
                warn!(error = %e, "Token refresh failed, using current token");
                Ok(current.access_token)
            }
            Err(e) => Err(e),
        }
    }

    /// Sign out and remove the stored credential.
    ///
    /// Remote sign-out is best effort; the local file is always removed.
    pub async fn logout(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(current) = self.store.get(true).await {
            if current.token_kind == TokenKind::Standard {
                if let Err(e) = self.identity.sign_out(&current.access_token).await {
                    warn!(error = %e, "Remote sign-out failed");
                }
            }
        }

        self.store.clear().await?;
        info!("Logged out");
        Ok(())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.get_credentials().await.is_some()
    }

    /// `Authorization: Bearer <token>` for the current credential.
    pub async fn get_auth_headers(&self) -> Result<HeaderMap> {
        let credential = self
            .get_credentials()
            .await
            .ok_or(AuthError::NotAuthenticated)?;

        let value = HeaderValue::from_str(&format!("Bearer {}", credential.access_token))
            .map_err(|_| AuthError::NotAuthenticated)?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    /// Remove quarantined credential files older than the configured age.
    pub async fn cleanup_quarantined(&self) -> usize {
        self.store
            .cleanup_quarantined(self.config.quarantine_max_age)
            .await
    }
}

/// Credential supplied through `TM_AUTH_TOKEN`, if set.
fn env_credential() -> Option<Credential> {
    let token = std::env::var(AUTH_TOKEN_ENV_VAR).ok()?;
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    debug!("Using token from {AUTH_TOKEN_ENV_VAR} environment variable");
    Some(Credential::api_key(
        token,
        UserInfo {
            id: "env".to_string(),
            email: None,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::NoopBrowser;
    use crate::types::TokenResult;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeIdentity {
        refreshes: AtomicUsize,
        sign_outs: AtomicUsize,
    }

    fn user() -> UserInfo {
        UserInfo {
            id: "u-1".to_string(),
            email: Some("dev@example.com".to_string()),
        }
    }

    #[async_trait]
    impl IdentityClient for FakeIdentity {
        async fn exchange_code(&self, code: &str) -> Result<TokenResult> {
            Ok(TokenResult {
                access_token: format!("at-{code}"),
                refresh_token: Some("rt".to_string()),
                expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
                user: Some(user()),
            })
        }

        async fn refresh(&self, refresh_token: &str) -> Result<TokenResult> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(TokenResult {
                access_token: format!("refreshed-{n}-from-{refresh_token}"),
                refresh_token: None,
                expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
                user: Some(UserInfo {
                    id: "other".to_string(),
                    email: None,
                }),
            })
        }

        async fn sign_in_with_password(&self, identifier: &str, secret: &str) -> Result<TokenResult> {
            if secret != "correct" {
                return Err(AuthError::TokenExchangeFailed("invalid credentials".to_string()));
            }
            Ok(TokenResult {
                access_token: format!("pw-{identifier}"),
                refresh_token: Some("rt".to_string()),
                expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
                user: None,
            })
        }

        async fn validate_api_key(&self, key: &str) -> Result<UserInfo> {
            if key == "bad" {
                return Err(AuthError::TokenExchangeFailed("API key was rejected".to_string()));
            }
            Ok(user())
        }

        async fn get_user(&self, _access_token: &str) -> Result<UserInfo> {
            Ok(UserInfo {
                id: "u-lookup".to_string(),
                email: None,
            })
        }

        async fn sign_out(&self, _access_token: &str) -> Result<()> {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(dir: &TempDir) -> (AuthManager, Arc<FakeIdentity>) {
        let identity = Arc::new(FakeIdentity::default());
        let manager = AuthManager::new(
            AuthConfig::for_dir(dir.path()),
            identity.clone(),
            Arc::new(NoopBrowser),
        );
        (manager, identity)
    }

    fn standard(expires_in: ChronoDuration, refresh: Option<&str>) -> Credential {
        Credential::from_token_result(
            TokenResult {
                access_token: "stored-at".to_string(),
                refresh_token: refresh.map(str::to_string),
                expires_at: Some(Utc::now() + expires_in),
                user: None,
            },
            user(),
        )
    }

    #[tokio::test]
    #[serial]
    async fn test_fresh_store_is_signed_out() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);

        assert!(manager.get_credentials().await.is_none());
        assert!(!manager.is_authenticated().await);
        let err = manager.get_auth_headers().await.unwrap_err();
        assert_eq!(err.code(), "NOT_AUTHENTICATED");
    }

    #[tokio::test]
    #[serial]
    async fn test_api_key_login() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);

        manager.authenticate_with_api_key("key123").await.unwrap();

        let stored = manager.store().get(false).await.unwrap();
        assert_eq!(stored.token_kind, TokenKind::ApiKey);
        assert_eq!(stored.expires_at, None);
        assert_eq!(stored.user_id, "u-1");

        let headers = manager.get_auth_headers().await.unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer key123");
    }

    #[tokio::test]
    #[serial]
    async fn test_rejected_api_key_is_not_saved() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);

        let err = manager.authenticate_with_api_key("bad").await.unwrap_err();
        assert_eq!(err.code(), "TOKEN_EXCHANGE_FAILED");
        assert!(!manager.config().config_file.exists());
    }

    #[tokio::test]
    #[serial]
    async fn test_password_login_looks_up_user() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);

        let saved = manager
            .authenticate_with_credentials("dev@example.com", "correct")
            .await
            .unwrap();
        assert_eq!(saved.access_token, "pw-dev@example.com");
        assert_eq!(saved.user_id, "u-lookup");
        assert_eq!(saved.token_kind, TokenKind::Standard);

        let err = manager
            .authenticate_with_credentials("dev@example.com", "wrong")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TOKEN_EXCHANGE_FAILED");
        assert_eq!(
            manager.get_credentials().await.unwrap().access_token,
            "pw-dev@example.com"
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_corrupt_file_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        let path = manager.config().config_file.clone();
        std::fs::write(&path, "{\"accessToken\": ").unwrap();

        assert!(manager.get_credentials().await.is_none());
        assert!(!path.exists());
        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(quarantined);
    }

    #[tokio::test]
    #[serial]
    async fn test_refresh_without_refresh_token() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        manager.authenticate_with_api_key("key123").await.unwrap();

        let err = manager.refresh_token().await.unwrap_err();
        assert!(matches!(err, AuthError::NoRefreshToken));
    }

    #[tokio::test]
    #[serial]
    async fn test_refresh_when_signed_out() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);

        let err = manager.refresh_token().await.unwrap_err();
        assert_eq!(err.code(), "NOT_AUTHENTICATED");
    }

    #[tokio::test]
    #[serial]
    async fn test_refresh_preserves_identity() {
        let dir = TempDir::new().unwrap();
        let (manager, identity) = manager(&dir);
        manager
            .store()
            .save(&standard(ChronoDuration::seconds(-5), Some("rt-old")))
            .await
            .unwrap();

        let refreshed = manager.refresh_token().await.unwrap();
        assert_eq!(refreshed.access_token, "refreshed-1-from-rt-old");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("rt-old"));
        assert_eq!(refreshed.user_id, "u-1");
        assert_eq!(refreshed.email.as_deref(), Some("dev@example.com"));
        assert_eq!(identity.refreshes.load(Ordering::SeqCst), 1);
        assert!(manager.is_authenticated().await);
    }

    #[tokio::test]
    #[serial]
    async fn test_access_token_refreshes_when_expiring() {
        let dir = TempDir::new().unwrap();
        let (manager, identity) = manager(&dir);
        manager
            .store()
            .save(&standard(ChronoDuration::seconds(10), Some("rt-old")))
            .await
            .unwrap();

        let token = manager.get_access_token().await.unwrap();
        assert_eq!(token, "refreshed-1-from-rt-old");
        assert_eq!(identity.refreshes.load(Ordering::SeqCst), 1);

        // Fresh token now, no second refresh.
        let token = manager.get_access_token().await.unwrap();
        assert_eq!(token, "refreshed-1-from-rt-old");
        assert_eq!(identity.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[serial]
    async fn test_concurrent_access_token_refreshes_once() {
        let dir = TempDir::new().unwrap();
        let (manager, identity) = manager(&dir);
        manager
            .store()
            .save(&standard(ChronoDuration::seconds(10), Some("rt-old")))
            .await
            .unwrap();

        let (first, second) = tokio::join!(manager.get_access_token(), manager.get_access_token());
        assert_eq!(first.unwrap(), "refreshed-1-from-rt-old");
        assert_eq!(second.unwrap(), "refreshed-1-from-rt-old");
        assert_eq!(identity.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[serial]
    async fn test_pending_oauth_does_not_block_logout() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);

        let login = manager.authenticate_with_oauth(
            AuthenticateOptions::default()
                .open_browser(false)
                .timeout(Duration::from_secs(1)),
        );
        let logout = tokio::time::timeout(Duration::from_millis(300), manager.logout());

        let (login, logout) = tokio::join!(login, logout);
        assert!(matches!(login.unwrap_err(), AuthError::Timeout(_)));
        assert!(logout.expect("logout blocked by pending login").is_ok());
    }

    #[tokio::test]
    #[serial]
    async fn test_expired_without_refresh_token_is_not_authenticated() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        manager
            .store()
            .save(&standard(ChronoDuration::seconds(-5), None))
            .await
            .unwrap();

        assert!(!manager.is_authenticated().await);
        let err = manager.get_access_token().await.unwrap_err();
        assert_eq!(err.code(), "NOT_AUTHENTICATED");
    }

    #[tokio::test]
    #[serial]
    async fn test_logout_signs_out_and_clears() {
        let dir = TempDir::new().unwrap();
        let (manager, identity) = manager(&dir);
        manager
            .store()
            .save(&standard(ChronoDuration::hours(1), Some("rt")))
            .await
            .unwrap();

        manager.logout().await.unwrap();
        assert!(!manager.is_authenticated().await);
        assert!(!manager.config().config_file.exists());
        assert_eq!(identity.sign_outs.load(Ordering::SeqCst), 1);

        // Logging out twice is fine.
        manager.logout().await.unwrap();
        assert_eq!(identity.sign_outs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[serial]
    async fn test_env_token_overrides_store() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        manager.authenticate_with_api_key("key123").await.unwrap();

        unsafe { std::env::set_var(AUTH_TOKEN_ENV_VAR, "ci-token") };
        let credential = manager.get_credentials().await;
        let headers = manager.get_auth_headers().await;
        let token = manager.get_access_token().await;
        unsafe { std::env::remove_var(AUTH_TOKEN_ENV_VAR) };

        assert_eq!(credential.unwrap().access_token, "ci-token");
        assert_eq!(
            headers.unwrap().get(AUTHORIZATION).unwrap(),
            "Bearer ci-token"
        );
        assert_eq!(token.unwrap(), "ci-token");
        assert_eq!(
            manager.get_credentials().await.unwrap().access_token,
            "key123"
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_oauth_timeout_creates_no_file() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);

        let err = manager
            .authenticate_with_oauth(
                AuthenticateOptions::default()
                    .open_browser(false)
                    .timeout(Duration::from_millis(150)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Timeout(_)));
        assert!(!manager.config().config_file.exists());
    }

    #[tokio::test]
    #[serial]
    async fn test_oauth_state_mismatch_saves_nothing() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        let (url_tx, mut url_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

        let options = AuthenticateOptions::default()
            .open_browser(false)
            .timeout(Duration::from_secs(10))
            .on_auth_url(move |url| {
                let _ = url_tx.send(url.to_string());
            });
        let login = manager.authenticate_with_oauth(options);
        let attack = async {
            let auth_url = url::Url::parse(&url_rx.recv().await.unwrap()).unwrap();
            let redirect = auth_url
                .query_pairs()
                .find(|(k, _)| k == "redirect_uri")
                .map(|(_, v)| v.into_owned())
                .unwrap();
            let mut callback = url::Url::parse(&redirect).unwrap();
            callback
                .query_pairs_mut()
                .append_pair("state", "guessed")
                .append_pair("access_token", "attacker-token")
                .append_pair("user_id", "attacker");
            reqwest::get(callback).await.unwrap();
        };

        let (result, ()) = tokio::join!(login, attack);
        assert!(matches!(result.unwrap_err(), AuthError::StateMismatch));
        assert!(!manager.config().config_file.exists());
    }

    #[tokio::test]
    #[serial]
    async fn test_oauth_success_persists_credential() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        let (url_tx, mut url_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

        let options = AuthenticateOptions::default()
            .open_browser(false)
            .timeout(Duration::from_secs(10))
            .on_auth_url(move |url| {
                let _ = url_tx.send(url.to_string());
            });
        let login = manager.authenticate_with_oauth(options);
        let browser = async {
            let auth_url = url::Url::parse(&url_rx.recv().await.unwrap()).unwrap();
            let query: std::collections::HashMap<String, String> =
                auth_url.query_pairs().into_owned().collect();
            let mut callback = url::Url::parse(&query["redirect_uri"]).unwrap();
            callback
                .query_pairs_mut()
                .append_pair("state", &query["state"])
                .append_pair("code", "xyz");
            reqwest::get(callback).await.unwrap();
        };

        let (result, ()) = tokio::join!(login, browser);
        let saved = result.unwrap();
        assert_eq!(saved.access_token, "at-xyz");
        assert!(saved.saved_at.is_some());
        assert_eq!(
            manager.get_credentials().await.unwrap().access_token,
            "at-xyz"
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_cleanup_quarantined_uses_configured_age() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir);
        let old = manager.store().quarantine_path(1);
        std::fs::write(&old, "junk").unwrap();

        assert_eq!(manager.cleanup_quarantined().await, 1);
        assert!(!old.exists());
    }

    #[test]
    #[serial]
    fn test_singleton_first_config_wins() {
        reset_instance();
        let first_dir = TempDir::new().unwrap();
        let second_dir = TempDir::new().unwrap();

        let first = get_instance(Some(AuthConfig::for_dir(first_dir.path()))).unwrap();
        let second = get_instance(Some(AuthConfig::for_dir(second_dir.path()))).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().config_dir, first_dir.path());

        let unchanged = get_instance(None).unwrap();
        assert!(Arc::ptr_eq(&first, &unchanged));

        reset_instance();
        let fresh = get_instance(Some(AuthConfig::for_dir(second_dir.path()))).unwrap();
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert_eq!(fresh.config().config_dir, second_dir.path());
        reset_instance();
    }

    #[test]
    #[serial]
    fn test_singleton_rejects_invalid_config() {
        reset_instance();
        let dir = TempDir::new().unwrap();
        let config = AuthConfig::for_dir(dir.path()).with_api_base_url("not a url");

        let err = get_instance(Some(config)).err().unwrap();
        assert_eq!(err.code(), "CONFIG_MISSING");
        reset_instance();
    }
}
