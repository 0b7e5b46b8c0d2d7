//! Request error types

use serde_json::Value;
use thiserror::Error;

/// Failure surfaced to the caller of [`Requester::request`](crate::Requester::request)
///
/// Rate limiting never shows up here; it is absorbed by the requester.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The server rejected the request (4xx other than 429)
    #[error("Request rejected with status {status}")]
    Client {
        status: u16,
        /// Decoded error body, when the server sent JSON
        body: Option<Value>,
    },

    /// Server errors persisted past the configured retry ceiling
    #[error("Server error {status} persisted after {attempts} attempts")]
    ServerError { status: u16, attempts: u32 },

    /// Connection failure, malformed response body, or a dropped request
    #[error("Unknown request failure: {0}")]
    Unknown(String),
}

impl RequestError {
    /// Get the HTTP status carried by this error, if any
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. } | Self::ServerError { status, .. } => Some(*status),
            Self::Unknown(_) => None,
        }
    }

    /// Get a stable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Client { .. } => "CLIENT_ERROR",
            Self::ServerError { .. } => "SERVER_ERROR",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// Check if this is a client error (4xx)
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Client { .. })
    }

    /// Get the `message` field of the server's error body
    #[must_use]
    pub fn api_message(&self) -> Option<&str> {
        match self {
            Self::Client { body: Some(body), .. } => body.get("message").and_then(Value::as_str),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unknown(err.to_string())
    }
}

/// Request result type
pub type RequestResult<T> = Result<T, RequestError>;
