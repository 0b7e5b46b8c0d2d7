//! Gateway error types

use crate::protocol::CloseCode;
use thiserror::Error;

/// Errors surfaced by shards
///
/// Only `Fatal` ends a shard on its own; the rest are reported to the caller of
/// a send or logged while the shard reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The gateway closed with a code that forbids reconnecting
    #[error("Gateway closed the connection: {0}")]
    Fatal(CloseCode),

    /// Inbound frame could not be decoded
    #[error("Malformed gateway frame: {0}")]
    Decode(String),

    /// Outbound frame could not be encoded
    #[error("Failed to encode gateway frame: {0}")]
    Encode(String),

    /// Dialing the gateway failed
    #[error("Failed to connect to gateway: {0}")]
    Connect(String),

    /// No socket is open right now
    #[error("Shard is not connected")]
    NotConnected,

    /// The shard has shut down
    #[error("Shard has stopped")]
    Stopped,

    #[error("Shard count must be at least 1")]
    InvalidShardCount,

    #[error("Shards are already running")]
    AlreadyStarted,
}

impl GatewayError {
    /// Check if this error ends the shard
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Get the close code behind a fatal error
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Fatal(code) => Some(*code),
            _ => None,
        }
    }

    /// Get a stable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Fatal(_) => "FATAL_CLOSE",
            Self::Decode(_) => "DECODE_ERROR",
            Self::Encode(_) => "ENCODE_ERROR",
            Self::Connect(_) => "CONNECT_ERROR",
            Self::NotConnected => "NOT_CONNECTED",
            Self::Stopped => "STOPPED",
            Self::InvalidShardCount => "INVALID_SHARD_COUNT",
            Self::AlreadyStarted => "ALREADY_STARTED",
        }
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
