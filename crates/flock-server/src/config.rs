// ABOUTME: Configuration loading and validation for the flock server.
// ABOUTME: Reads FLOCK_* environment variables and refuses remote binds without a bearer token.

use std::net::SocketAddr;
use std::path::PathBuf;

use flock_core::RestoreMode;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("FLOCK_BIND is not a valid socket address: {0}")]
    InvalidBind(String),

    #[error("FLOCK_ALLOW_REMOTE is true but FLOCK_AUTH_TOKEN is not set; refusing to start without authentication")]
    RemoteWithoutToken,

    #[error("FLOCK_BIND {0} is not a loopback address; set FLOCK_ALLOW_REMOTE=true and FLOCK_AUTH_TOKEN to serve remotely")]
    RemoteNotAllowed(SocketAddr),

    #[error("FLOCK_RESTORE_MODE: {0}")]
    InvalidRestoreMode(String),

    #[error("FLOCK_MAX_RESTORE_BYTES is not a positive byte count: {0}")]
    InvalidRestoreLimit(String),
}

/// Largest restore request body accepted unless FLOCK_MAX_RESTORE_BYTES says otherwise.
pub const DEFAULT_MAX_RESTORE_BYTES: usize = 256 * 1024 * 1024;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct FlockConfig {
    pub home: PathBuf,
    pub bind: SocketAddr,
    pub allow_remote: bool,
    pub auth_token: Option<String>,
    /// Principal name that token-authenticated requests act as.
    pub operator: String,
    pub restore_mode: RestoreMode,
    /// Body limit for POST /api/backups/restore.
    pub max_restore_bytes: usize,
}

impl FlockConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - FLOCK_HOME: data directory (default: ~/.flock)
    /// - FLOCK_BIND: socket address to bind (default: 127.0.0.1:7431)
    /// - FLOCK_ALLOW_REMOTE: allow non-loopback binds (default: false)
    /// - FLOCK_AUTH_TOKEN: bearer token for API auth (optional)
    /// - FLOCK_OPERATOR: principal name for authenticated requests (default: admin)
    /// - FLOCK_RESTORE_MODE: staged or in-place (default: staged)
    /// - FLOCK_MAX_RESTORE_BYTES: restore body limit in bytes (default: 256 MiB)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("FLOCK_HOME")
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                lookup("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".flock")
            });

        let bind_str = lookup("FLOCK_BIND").unwrap_or_else(|| "127.0.0.1:7431".to_string());
        let bind: SocketAddr = bind_str
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind_str))?;

        let allow_remote = lookup("FLOCK_ALLOW_REMOTE")
            .map(|v| v == "true" || v == "1" || v == "yes")
            .unwrap_or(false);

        let auth_token = lookup("FLOCK_AUTH_TOKEN").filter(|t| !t.is_empty());

        let operator = lookup("FLOCK_OPERATOR")
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| "admin".to_string());

        let restore_mode = match lookup("FLOCK_RESTORE_MODE").filter(|m| !m.is_empty()) {
            Some(mode) => mode.parse().map_err(ConfigError::InvalidRestoreMode)?,
            None => RestoreMode::default(),
        };

        let max_restore_bytes = match lookup("FLOCK_MAX_RESTORE_BYTES").filter(|v| !v.is_empty()) {
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidRestoreLimit(raw)),
            },
            None => DEFAULT_MAX_RESTORE_BYTES,
        };

        // Security validation: remote access requires an auth token
        if allow_remote && auth_token.is_none() {
            return Err(ConfigError::RemoteWithoutToken);
        }
        if !allow_remote && !bind.ip().is_loopback() {
            return Err(ConfigError::RemoteNotAllowed(bind));
        }

        Ok(Self {
            home,
            bind,
            allow_remote,
            auth_token,
            operator,
            restore_mode,
            max_restore_bytes,
        })
    }
}
