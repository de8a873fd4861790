//! Error types for the mail watcher.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
/// Error type for all client, poller and collaborator operations.
pub enum Error {
    /// Underlying HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// IO error when reading or writing data.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Invalid or unreadable configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Generic network error with a message.
    #[error("network error: {0}")]
    Network(String),
    /// Parse error with a message.
    #[error("parse error: {0}")]
    Parse(String),
    /// Clipboard could not be written.
    #[error("clipboard error: {0}")]
    Clipboard(String),
    /// Fetch operation failed for a reason other than HTTP.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// HTTP response returned a non-success status with body.
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl Error {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Network(_) | Error::Fetch(_) => true,
            Error::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// Result type for mail watcher operations.
pub type Result<T> = std::result::Result<T, Error>;
