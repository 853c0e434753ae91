//! Server configuration.
//!
//! The socket-level settings live in [`ServerConfig`]; everything the daemon
//! needs from the environment (OAuth application credentials, token
//! directory, callback address) lives in [`AppConfig`], which fails fast on
//! missing required variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ServerError, ServerResult};

/// Required environment variables.
const ENV_CLIENT_ID: &str = "GOOGLE_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "GOOGLE_CLIENT_SECRET";

/// Optional environment variables.
const ENV_SOCKET: &str = "CALBRIDGE_SOCKET";
const ENV_TOKEN_DIR: &str = "CALBRIDGE_TOKEN_DIR";
const ENV_CALLBACK_ADDR: &str = "CALBRIDGE_CALLBACK_ADDR";
const ENV_BASE_URL: &str = "CALBRIDGE_BASE_URL";
const ENV_SCOPES: &str = "CALBRIDGE_SCOPES";
const ENV_OPEN_BROWSER: &str = "CALBRIDGE_OPEN_BROWSER";
const ENV_AUTH_TIMEOUT: &str = "CALBRIDGE_AUTH_TIMEOUT_SECS";

/// Default scope: read/write access to calendar events only.
const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/calendar.events";

/// Default address for the OAuth callback listener.
const DEFAULT_CALLBACK_ADDR: &str = "127.0.0.1:8917";

/// Socket server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the Unix socket.
    pub socket_path: PathBuf,

    /// Connection timeout.
    pub connection_timeout: Duration,

    /// Maximum concurrent connections.
    pub max_connections: usize,

    /// Whether to remove stale socket on startup.
    pub cleanup_stale_socket: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            connection_timeout: Duration::from_secs(30),
            max_connections: 100,
            cleanup_stale_socket: true,
        }
    }
}

impl ServerConfig {
    /// Creates a new server configuration with the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }

    /// Builder: set connection timeout.
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Builder: set max connections.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Builder: set cleanup stale socket.
    #[must_use]
    pub fn with_cleanup_stale_socket(mut self, cleanup: bool) -> Self {
        self.cleanup_stale_socket = cleanup;
        self
    }
}

/// Returns the default socket path.
///
/// Uses `$XDG_RUNTIME_DIR/calbridge.sock` if available,
/// otherwise falls back to `/tmp/calbridge-$UID.sock`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("calbridge.sock")
    } else {
        #[cfg(unix)]
        let uid = unsafe { libc::getuid() };
        #[cfg(not(unix))]
        let uid = 0;
        PathBuf::from(format!("/tmp/calbridge-{}.sock", uid))
    }
}

/// Returns the default token directory.
pub fn default_token_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("calbridge")
        .join("tokens")
}

/// Everything the daemon reads from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Socket configuration.
    pub server: ServerConfig,
    /// Directory for per-profile credential files.
    pub token_dir: PathBuf,
    /// Address the callback listener binds to.
    pub callback_addr: String,
    /// Calendar API base URL override (for testing against a mock).
    pub base_url: Option<String>,
    /// OAuth scopes to request.
    pub scopes: Vec<String>,
    /// Whether to try opening the consent URL in a browser.
    pub open_browser: bool,
    /// Bound on the interactive authorization wait.
    pub authorize_timeout: Duration,
}

impl AppConfig {
    /// Loads configuration from the environment.
    ///
    /// # Errors
    ///
    /// Fails fast when `GOOGLE_CLIENT_ID` or `GOOGLE_CLIENT_SECRET` is
    /// missing or empty, or when an optional variable has an unparseable
    /// value.
    pub fn from_env() -> ServerResult<Self> {
        let client_id = require_env(ENV_CLIENT_ID)?;
        let client_secret = require_env(ENV_CLIENT_SECRET)?;

        let server = match std::env::var(ENV_SOCKET) {
            Ok(path) if !path.is_empty() => ServerConfig::new(path),
            _ => ServerConfig::default(),
        };

        let token_dir = std::env::var(ENV_TOKEN_DIR)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_token_dir);

        let callback_addr = std::env::var(ENV_CALLBACK_ADDR)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_CALLBACK_ADDR.to_string());

        let base_url = std::env::var(ENV_BASE_URL).ok().filter(|v| !v.is_empty());

        let scopes = std::env::var(ENV_SCOPES)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| vec![DEFAULT_SCOPE.to_string()]);

        let open_browser = match std::env::var(ENV_OPEN_BROWSER) {
            Ok(v) => parse_bool(ENV_OPEN_BROWSER, &v)?,
            Err(_) => false,
        };

        let authorize_timeout = match std::env::var(ENV_AUTH_TIMEOUT) {
            Ok(v) => {
                let secs: u64 = v.parse().map_err(|_| {
                    ServerError::config(format!("{ENV_AUTH_TIMEOUT} must be an integer, got {v:?}"))
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(300),
        };

        Ok(Self {
            client_id,
            client_secret,
            server,
            token_dir,
            callback_addr,
            base_url,
            scopes,
            open_browser,
            authorize_timeout,
        })
    }

    /// The redirect URI the OAuth application must be registered with.
    pub fn redirect_uri(&self) -> String {
        format!("http://{}/oauth/callback", self.callback_addr)
    }
}

fn require_env(name: &str) -> ServerResult<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ServerError::config(format!(
            "{name} must be set in the environment"
        ))),
    }
}

fn parse_bool(name: &str, value: &str) -> ServerResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ServerError::config(format!(
            "{name} must be a boolean, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert!(config.socket_path.to_string_lossy().contains("calbridge"));
        assert_eq!(config.connection_timeout, Duration::from_secs(30));
        assert_eq!(config.max_connections, 100);
        assert!(config.cleanup_stale_socket);
    }

    #[test]
    fn custom_config() {
        let config = ServerConfig::new("/custom/path.sock")
            .with_connection_timeout(Duration::from_secs(60))
            .with_max_connections(50)
            .with_cleanup_stale_socket(false);

        assert_eq!(config.socket_path, PathBuf::from("/custom/path.sock"));
        assert_eq!(config.connection_timeout, Duration::from_secs(60));
        assert_eq!(config.max_connections, 50);
        assert!(!config.cleanup_stale_socket);
    }

    #[test]
    fn default_socket_path_format() {
        let path = default_socket_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("calbridge"));
        assert!(path_str.ends_with(".sock"));
    }

    #[test]
    fn parse_bool_values() {
        assert!(parse_bool("X", "true").unwrap());
        assert!(parse_bool("X", "1").unwrap());
        assert!(!parse_bool("X", "no").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }
}
