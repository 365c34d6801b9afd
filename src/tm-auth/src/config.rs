//! Configuration resolved once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    API_BASE_URL_ENV_VAR, AUTH_FILE_NAME, CLIENT_NAME, CLIENT_VERSION, CONFIG_DIR_ENV_VAR,
    CONFIG_DIR_NAME, DEFAULT_API_BASE_URL, DEFAULT_FLOW_TIMEOUT, DEFAULT_QUARANTINE_MAX_AGE,
    DEFAULT_WEB_BASE_URL, WEB_BASE_URL_ENV_VAR,
};
use crate::error::{AuthError, Result};

/// Authentication configuration.
///
/// Immutable once handed to an [`AuthManager`](crate::AuthManager). Tests
/// build one with [`AuthConfig::for_dir`] instead of touching the real home
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Base URL of the identity API.
    pub api_base_url: String,
    /// Root of the browser sign-in pages.
    pub web_base_url: String,
    /// Directory holding the credential file.
    pub config_dir: PathBuf,
    /// Absolute path of the persisted credential file.
    pub config_file: PathBuf,
    /// Client name reported in sign-in metadata.
    pub client_name: String,
    /// Client version reported in sign-in metadata.
    pub client_version: String,
    /// Default upper bound for a browser flow.
    pub flow_timeout: Duration,
    /// Age after which quarantined files are deleted.
    pub quarantine_max_age: Duration,
}

impl AuthConfig {
    /// Resolve the process-wide configuration from the environment and
    /// compiled-in defaults.
    pub fn resolve() -> Result<Self> {
        let config_dir = match env_non_empty(CONFIG_DIR_ENV_VAR) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .map(|home| home.join(CONFIG_DIR_NAME))
                .ok_or_else(|| {
                    AuthError::ConfigMissing(format!(
                        "cannot determine home directory; set {CONFIG_DIR_ENV_VAR}"
                    ))
                })?,
        };

        let mut config = Self::for_dir(config_dir);
        if let Some(url) = env_non_empty(API_BASE_URL_ENV_VAR) {
            config.api_base_url = url;
        }
        if let Some(url) = env_non_empty(WEB_BASE_URL_ENV_VAR) {
            config.web_base_url = url;
        }

        config.validate()?;
        tracing::debug!(
            api_base_url = %config.api_base_url,
            web_base_url = %config.web_base_url,
            config_file = %config.config_file.display(),
            "Resolved auth configuration"
        );
        Ok(config)
    }

    /// Configuration rooted at `config_dir` with default URLs.
    pub fn for_dir(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            web_base_url: DEFAULT_WEB_BASE_URL.to_string(),
            config_file: config_dir.join(AUTH_FILE_NAME),
            config_dir,
            client_name: CLIENT_NAME.to_string(),
            client_version: CLIENT_VERSION.to_string(),
            flow_timeout: DEFAULT_FLOW_TIMEOUT,
            quarantine_max_age: DEFAULT_QUARANTINE_MAX_AGE,
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_web_base_url(mut self, url: impl Into<String>) -> Self {
        self.web_base_url = url.into();
        self
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = path.into();
        self
    }

    pub fn with_flow_timeout(mut self, timeout: Duration) -> Self {
        self.flow_timeout = timeout;
        self
    }

    /// Check URLs and paths.
    ///
    /// Base URLs must use HTTPS unless they point at a loopback host.
    pub fn validate(&self) -> Result<()> {
        validate_base_url("api_base_url", &self.api_base_url)?;
        validate_base_url("web_base_url", &self.web_base_url)?;
        if !self.config_file.is_absolute() {
            return Err(AuthError::ConfigMissing(format!(
                "config_file must be an absolute path: {}",
                self.config_file.display()
            )));
        }
        Ok(())
    }

    /// Directory the credential file lives in.
    pub fn credential_dir(&self) -> &Path {
        self.config_file.parent().unwrap_or(&self.config_dir)
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn validate_base_url(field: &str, value: &str) -> Result<()> {
    let url = url::Url::parse(value)
        .map_err(|e| AuthError::ConfigMissing(format!("{field} is not a valid URL: {e}")))?;

    if !url.username().is_empty() || url.password().is_some() {
        return Err(AuthError::ConfigMissing(format!(
            "{field} must not embed credentials"
        )));
    }

    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(&url) => Ok(()),
        scheme => Err(AuthError::ConfigMissing(format!(
            "{field} must use https (got {scheme})"
        ))),
    }
}

fn is_loopback(url: &url::Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
