//! Browser-based OAuth flow with a local callback listener.
//!
//! One [`OAuthFlowController`] drives one sign-in attempt:
//!
//! `Idle -> Listening -> Completed | Denied | StateMismatch | TimedOut`
//! (plus `Cancelled` and `Failed` for caller cancellation and exchange errors).
//!
//! SECURITY:
//! - Listener binds to 127.0.0.1 on an OS-assigned port
//! - The `state` parameter (256 random bits) is compared in constant time
//!   before any token material in the callback is used
//! - Exactly one terminal transition fires; later callbacks and timers are no-ops

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::browser::BrowserLauncher;
use crate::config::AuthConfig;
use crate::constants::{CALLBACK_PATH, SIGN_IN_PATH};
use crate::error::{AuthError, Result};
use crate::identity::{IdentityClient, resolve_expiry};
use crate::types::{Credential, TokenResult, UserInfo};

/// How long to wait for the listener to drain after the flow settles.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Task Master</title></head>
<body>
    <h1>Authentication complete!</h1>
    <p>You can close this window and return to the terminal.</p>
    <script>window.close();</script>
</body>
</html>"#;

const FAILURE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Task Master - Error</title></head>
<body>
    <h1>Authentication failed</h1>
    <p>Please check the terminal for details and try again.</p>
</body>
</html>"#;

const SETTLED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Task Master</title></head>
<body>
    <h1>This sign-in request has already finished</h1>
    <p>Return to the terminal to continue.</p>
</body>
</html>"#;

/// Lifecycle of one flow attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Listening,
    Completed,
    Denied,
    StateMismatch,
    TimedOut,
    Cancelled,
    /// Callback was authentic but the token exchange or lookup failed.
    Failed,
}

impl FlowState {
    fn from_outcome(outcome: &Result<Credential>) -> Self {
        match outcome {
            Ok(_) => FlowState::Completed,
            Err(AuthError::OAuthDenied { .. }) => FlowState::Denied,
            Err(AuthError::StateMismatch) => FlowState::StateMismatch,
            Err(AuthError::Timeout(_)) => FlowState::TimedOut,
            Err(AuthError::Cancelled) => FlowState::Cancelled,
            Err(_) => FlowState::Failed,
        }
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FlowState::Idle => "idle",
            FlowState::Listening => "listening",
            FlowState::Completed => "completed",
            FlowState::Denied => "denied",
            FlowState::StateMismatch => "state_mismatch",
            FlowState::TimedOut => "timed_out",
            FlowState::Cancelled => "cancelled",
            FlowState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Transient per-attempt session. Never persisted.
#[derive(Debug, Clone)]
pub struct OAuthSession {
    /// Anti-CSRF value echoed back by the provider.
    pub state: String,
    pub callback_port: u16,
    /// Deadline after which the flow times out.
    pub expires_at: Instant,
}

impl OAuthSession {
    pub(crate) fn new(callback_port: u16, timeout: Duration) -> Self {
        Self {
            state: generate_state(),
            callback_port,
            expires_at: Instant::now() + timeout,
        }
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}{CALLBACK_PATH}", self.callback_port)
    }
}

/// Caller hooks and limits for [`OAuthFlowController::authenticate`].
pub struct AuthenticateOptions {
    /// Launch the browser with the sign-in URL.
    pub open_browser: bool,
    /// Upper bound for the flow. Defaults to the configured flow timeout.
    pub timeout: Option<Duration>,
    /// Receives the sign-in URL so it can be shown for manual opening.
    pub on_auth_url: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// Called once the listener is up and the URL has been surfaced.
    pub on_waiting_for_auth: Option<Box<dyn Fn() + Send + Sync>>,
    /// Aborts the pending flow when cancelled (e.g. on Ctrl-C).
    pub cancel: Option<CancellationToken>,
}

impl Default for AuthenticateOptions {
    fn default() -> Self {
        Self {
            open_browser: true,
            timeout: None,
            on_auth_url: None,
            on_waiting_for_auth: None,
            cancel: None,
        }
    }
}

impl AuthenticateOptions {
    pub fn open_browser(mut self, open: bool) -> Self {
        self.open_browser = open;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_auth_url(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_auth_url = Some(Box::new(f));
        self
    }

    pub fn on_waiting_for_auth(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_waiting_for_auth = Some(Box::new(f));
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Drives one browser sign-in attempt.
pub struct OAuthFlowController {
    config: AuthConfig,
    identity: Arc<dyn IdentityClient>,
    browser: Arc<dyn BrowserLauncher>,
}

impl OAuthFlowController {
    pub fn new(
        config: AuthConfig,
        identity: Arc<dyn IdentityClient>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            config,
            identity,
            browser,
        }
    }

    /// Run the flow until a terminal state is reached.
    ///
    /// Consumes the controller: a flow attempt cannot be restarted.
    pub async fn authenticate(self, options: AuthenticateOptions) -> Result<Credential> {
        let timeout = options.timeout.unwrap_or(self.config.flow_timeout);

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| AuthError::Network(format!("failed to bind callback listener: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::Network(format!("failed to read listener address: {e}")))?
            .port();

        let session = OAuthSession::new(port, timeout);
        let auth_url = build_sign_in_url(&self.config, &session)?;

        let (result_tx, result_rx) = oneshot::channel();
        let guard = Arc::new(FlowGuard::new(result_tx));
        let app = callback_router(CallbackContext {
            expected_state: Arc::from(session.state.as_str()),
            identity: self.identity.clone(),
            guard: guard.clone(),
        });

        let shutdown = guard.shutdown.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        });
        debug!(port, state = %FlowState::Listening, "OAuth callback listener started");

        if let Some(on_auth_url) = &options.on_auth_url {
            on_auth_url(&auth_url);
        }
        if options.open_browser {
            if let Err(e) = self.browser.open(&auth_url) {
                warn!(error = %e, "Failed to open browser; the sign-in URL must be opened manually");
            }
        }
        if let Some(on_waiting) = &options.on_waiting_for_auth {
            on_waiting();
        }

        let cancel = options.cancel.unwrap_or_default();
        let mut server_finished = false;

        tokio::select! {
            _ = guard.shutdown.cancelled() => {}
            _ = tokio::time::sleep_until(session.expires_at) => {
                guard.settle(Err(AuthError::Timeout(timeout))).await;
            }
            _ = cancel.cancelled() => {
                guard.settle(Err(AuthError::Cancelled)).await;
            }
            result = &mut server => {
                server_finished = true;
                let reason = match result {
                    Ok(Ok(())) => "callback listener stopped unexpectedly".to_string(),
                    Ok(Err(e)) => format!("callback listener failed: {e}"),
                    Err(e) => format!("callback listener task failed: {e}"),
                };
                guard.settle(Err(AuthError::Network(reason))).await;
            }
        }

        if !server_finished {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
                Ok(Ok(Ok(()))) => debug!(port, "OAuth callback listener closed"),
                Ok(Ok(Err(e))) => warn!(error = %e, "OAuth callback listener closed with error"),
                Ok(Err(e)) => warn!(error = %e, "OAuth callback listener task failed"),
                Err(_) => {
                    warn!(port, "OAuth callback listener did not drain in time, aborting");
                    server.abort();
                }
            }
        }

        let result = result_rx.await.unwrap_or_else(|_| {
            Err(AuthError::Network("callback result channel dropped".to_string()))
        });

        let state = guard.terminal().unwrap_or(FlowState::Failed);
        match &result {
            Ok(credential) => info!(
                state = %state,
                user_id = %credential.user_id,
                "OAuth authentication successful"
            ),
            Err(e) => warn!(state = %state, code = e.code(), error = %e, "OAuth authentication failed"),
        }
        result
    }
}

/// Exactly-once terminal transition for a flow.
///
/// The callback handler, the timer, cancellation and listener failure all
/// race to settle; only the first caller's outcome is delivered and the
/// listener is shut down once.
struct FlowGuard {
    closed: AtomicBool,
    terminal: OnceLock<FlowState>,
    result_tx: Mutex<Option<oneshot::Sender<Result<Credential>>>>,
    shutdown: CancellationToken,
}

impl FlowGuard {
    fn new(result_tx: oneshot::Sender<Result<Credential>>) -> Self {
        Self {
            closed: AtomicBool::new(false),
            terminal: OnceLock::new(),
            result_tx: Mutex::new(Some(result_tx)),
            shutdown: CancellationToken::new(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn terminal(&self) -> Option<FlowState> {
        self.terminal.get().copied()
    }

    /// Deliver `outcome` and close the listener. Returns false if the flow
    /// had already settled, in which case nothing happens.
    async fn settle(&self, outcome: Result<Credential>) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("OAuth flow already settled, ignoring outcome");
            return false;
        }

        let _ = self.terminal.set(FlowState::from_outcome(&outcome));
        if let Some(tx) = self.result_tx.lock().await.take() {
            let _ = tx.send(outcome);
        }
        self.shutdown.cancel();
        true
    }
}

#[derive(Clone)]
struct CallbackContext {
    expected_state: Arc<str>,
    identity: Arc<dyn IdentityClient>,
    guard: Arc<FlowGuard>,
}

fn callback_router(ctx: CallbackContext) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(handle_callback))
        .fallback(|| async { (StatusCode::NOT_FOUND, "Not Found") })
        .with_state(ctx)
}

async fn handle_callback(
    State(ctx): State<CallbackContext>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    if ctx.guard.is_closed() {
        return settled_response(&ctx.guard);
    }

    let outcome = process_callback(&params, &ctx).await;
    let response = match &outcome {
        Ok(_) => (StatusCode::OK, Html(SUCCESS_PAGE)),
        Err(e) => {
            error!(code = e.code(), "OAuth callback error: {e}");
            (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE))
        }
    };

    if !ctx.guard.settle(outcome).await {
        return settled_response(&ctx.guard);
    }
    response
}

/// Page for a callback that arrived after the flow had already ended.
///
/// Only a completed sign-in is reported as finished; a flow that timed out,
/// was cancelled or rejected while this callback was in flight is a failure
/// from the user's point of view.
fn settled_response(guard: &FlowGuard) -> (StatusCode, Html<&'static str>) {
    match guard.terminal() {
        Some(FlowState::Completed) => (StatusCode::OK, Html(SETTLED_PAGE)),
        _ => (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE)),
    }
}

/// Turn a callback query into a credential.
///
/// The state check runs first, so nothing from a forged callback (not even
/// an error report) is acted on.
async fn process_callback(
    params: &HashMap<String, String>,
    ctx: &CallbackContext,
) -> Result<Credential> {
    let received_state = params.get("state").ok_or(AuthError::StateMismatch)?;
    if !constant_time_compare(&ctx.expected_state, received_state) {
        return Err(AuthError::StateMismatch);
    }
    debug!("OAuth state validation passed");

    if let Some(error) = params.get("error") {
        return Err(AuthError::OAuthDenied {
            error: error.clone(),
            description: params
                .get("error_description")
                .cloned()
                .unwrap_or_default(),
        });
    }

    let token = if let Some(code) = non_empty(params, "code") {
        ctx.identity.exchange_code(code).await?
    } else if let Some(access_token) = non_empty(params, "access_token") {
        direct_token(params, access_token)?
    } else {
        return Err(AuthError::MissingParameter("code"));
    };

    let user = match token.user.clone() {
        Some(user) => user,
        None => ctx.identity.get_user(&token.access_token).await?,
    };
    Ok(Credential::from_token_result(token, user))
}

/// Tokens delivered directly in the callback query.
fn direct_token(params: &HashMap<String, String>, access_token: &str) -> Result<TokenResult> {
    let expires_in = non_empty(params, "expires_in")
        .map(|raw| {
            raw.parse::<i64>().map_err(|e| {
                AuthError::TokenExchangeFailed(format!("invalid expires_in '{raw}': {e}"))
            })
        })
        .transpose()?;
    let expires_at = resolve_expiry(expires_in, non_empty(params, "expires_at"))?;

    let user = non_empty(params, "user_id").map(|id| UserInfo {
        id: id.to_string(),
        email: non_empty(params, "email").map(str::to_string),
    });

    Ok(TokenResult {
        access_token: access_token.to_string(),
        refresh_token: non_empty(params, "refresh_token").map(str::to_string),
        expires_at,
        user,
    })
}

fn non_empty<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Generate a URL-safe state value from 32 random bytes.
fn generate_state() -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[derive(Serialize)]
struct SessionMetadata<'a> {
    name: &'a str,
    version: &'a str,
    host: String,
    os: &'static str,
    arch: &'static str,
    timestamp: String,
}

fn encode_metadata(config: &AuthConfig) -> Result<String> {
    let metadata = SessionMetadata {
        name: &config.client_name,
        version: &config.client_version,
        host: hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string()),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    let json = serde_json::to_vec(&metadata)
        .map_err(|e| AuthError::ParseFailed(format!("failed to encode session metadata: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

pub(crate) fn build_sign_in_url(config: &AuthConfig, session: &OAuthSession) -> Result<String> {
    let base = config.web_base_url.trim_end_matches('/');
    let mut url = url::Url::parse(&format!("{base}{SIGN_IN_PATH}"))
        .map_err(|e| AuthError::ConfigMissing(format!("invalid web_base_url: {e}")))?;

    url.query_pairs_mut()
        .append_pair("redirect_uri", &session.redirect_uri())
        .append_pair("state", &session.state)
        .append_pair("metadata", &encode_metadata(config)?);

    Ok(url.into())
}
