//! Unified error types for the mention-market engine.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the engine and its binaries.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration validation error.
    #[error("invalid configuration: {0}")]
    Settings(#[from] ConfigError),

    /// Kalshi API error.
    #[error("kalshi error: {0}")]
    Kalshi(#[from] KalshiError),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration validation errors. All of these are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required setting is absent or empty.
    #[error("{0} is required")]
    Missing(&'static str),

    /// A setting has an unusable value.
    #[error("{field}: {reason}")]
    InvalidValue {
        /// Environment variable name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The private key file could not be read.
    #[error("failed to read private key from {path}: {source}")]
    PrivateKeyUnreadable {
        /// Path that was configured.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
}

/// Errors raised while talking to the Kalshi trade API.
#[derive(Error, Debug)]
pub enum KalshiError {
    /// Upstream answered with a non-success status.
    #[error("kalshi request failed: HTTP {status} {body}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Parsed body, or `{"raw": ..}` when it was not JSON.
        body: serde_json::Value,
    },

    /// Connection, timeout or body-read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The PEM private key could not be loaded.
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Signing a request failed.
    #[error("signing error: {0}")]
    Signing(String),

    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl KalshiError {
    /// Whether a bounded retry may help (5xx or a timed-out request).
    pub fn is_transient(&self) -> bool {
        match self {
            KalshiError::RequestFailed { status, .. } => *status >= 500,
            KalshiError::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            KalshiError::RequestFailed { status, .. } => Some(*status),
            KalshiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
