//! Error types for claw-client

use thiserror::Error;

/// Result type alias using claw-client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the chat service
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Service answered with a non-success status
    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// No credential available, or the service rejected it
    #[error("Not authorized")]
    Unauthorized,

    /// Daily message limit reached
    #[error("Rate limited: daily message limit reached")]
    RateLimited,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// A stream frame could not be decoded
    #[error("Malformed stream frame: {0}")]
    MalformedFrame(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Map a non-success HTTP status and its body to an error
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            401 | 403 => Error::Unauthorized,
            429 => Error::RateLimited,
            _ => Error::Status {
                status,
                body: body.into(),
            },
        }
    }

    /// Check if this error is an authorization failure
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Unauthorized)
    }

    /// Check if repeating the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Sse(_) => true,
            Error::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
