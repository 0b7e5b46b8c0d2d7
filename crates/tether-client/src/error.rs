//! Client error types

use tether_common::ConfigError;
use tether_gateway::GatewayError;
use tether_rest::RequestError;
use thiserror::Error;

/// Errors surfaced by [`Client`](crate::Client)
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// `connect` has not been called, or the client was shut down
    #[error("Gateway is not connected")]
    NotConnected,

    #[error("No shard with id {0}")]
    UnknownShard(u32),
}

impl ClientError {
    /// Get a stable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Request(e) => e.code(),
            Self::Gateway(e) => e.code(),
            Self::NotConnected => "NOT_CONNECTED",
            Self::UnknownShard(_) => "UNKNOWN_SHARD",
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
