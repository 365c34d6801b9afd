//! Task Master authentication.
//!
//! Provides the credential lifecycle for the CLI:
//! - Browser sign-in through a loopback OAuth callback
//! - Identifier/secret and API key login
//! - Token refresh and logout
//! - A single JSON credential file written atomically with 0600 permissions
//!
//! Most callers only need [`get_instance`] and the [`AuthManager`] it returns.

// Core modules
pub mod config;
pub mod constants;
pub mod error;
pub mod types;
mod utils;

// Storage
pub mod store;

// Identity provider boundary
pub mod identity;

// Authentication flows
pub mod browser;
pub mod oauth;

// Facade
pub mod manager;

pub use config::AuthConfig;
pub use error::{AuthError, Result};
pub use types::{Credential, TokenKind, TokenResult, UserInfo};

pub use store::CredentialStore;

pub use identity::{HttpIdentityClient, IdentityClient};

pub use browser::{BrowserLauncher, NoopBrowser, SystemBrowser};
pub use oauth::{AuthenticateOptions, FlowState, OAuthFlowController, OAuthSession};

pub use manager::{AuthManager, get_instance, reset_instance};

pub use constants::{
    API_BASE_URL_ENV_VAR, AUTH_TOKEN_ENV_VAR, CONFIG_DIR_ENV_VAR, WEB_BASE_URL_ENV_VAR,
};

pub use utils::safe_format_key;
