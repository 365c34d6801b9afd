//! Constants for the tm-auth crate.

use std::time::Duration;

/// Client name reported in the sign-in session metadata.
pub const CLIENT_NAME: &str = "task-master-cli";

/// Client version reported in the sign-in session metadata.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default API base URL used by the identity client.
pub const DEFAULT_API_BASE_URL: &str = "https://api.tryhamster.com";

/// Default root of the browser sign-in pages.
pub const DEFAULT_WEB_BASE_URL: &str = "https://tryhamster.com";

/// Environment variable holding a pre-provisioned bearer token.
///
/// When set and non-empty it bypasses both the credential file and the
/// browser flow.
pub const AUTH_TOKEN_ENV_VAR: &str = "TM_AUTH_TOKEN";

/// Environment variable overriding the API base URL.
pub const API_BASE_URL_ENV_VAR: &str = "TM_API_BASE_URL";

/// Environment variable overriding the web base URL.
pub const WEB_BASE_URL_ENV_VAR: &str = "TM_WEB_BASE_URL";

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV_VAR: &str = "TM_CONFIG_DIR";

/// Name of the configuration directory under the user's home.
pub const CONFIG_DIR_NAME: &str = ".taskmaster";

/// Name of the persisted credential file.
pub const AUTH_FILE_NAME: &str = "auth.json";

/// Suffix marker for quarantined credential files.
pub const CORRUPT_SUFFIX: &str = ".corrupt-";

/// Path of the single route served by the callback listener.
pub const CALLBACK_PATH: &str = "/callback";

/// Path of the sign-in page relative to the web base URL.
pub const SIGN_IN_PATH: &str = "/auth/cli/sign-in";

/// Default upper bound for one browser flow.
pub const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default age after which quarantined files are removed.
pub const DEFAULT_QUARANTINE_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Tokens expiring within this window are refreshed proactively.
pub const REFRESH_THRESHOLD_SECS: i64 = 60;

/// User-Agent string for HTTP requests
pub const USER_AGENT: &str = concat!("task-master-cli/", env!("CARGO_PKG_VERSION"));
