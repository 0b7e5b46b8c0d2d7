//! Shard status and outbound traffic classes

use serde::Serialize;
use std::time::Duration;

/// Connection lifecycle of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShardStatus {
    /// Not started, stopped, or closed with a fatal code
    Disconnected,
    /// Dialing the gateway
    Connecting,
    /// Socket open, waiting for hello
    AwaitingHello,
    /// Identify or resume sent, waiting for ready/resumed
    Identifying,
    /// Session established
    Connected,
    /// Connection dropped, about to dial again
    Reconnecting,
}

impl ShardStatus {
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Outbound frame classes, each throttled by its own bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficClass {
    /// Everything except presence updates
    General,
    /// Presence updates
    Presence,
}

impl TrafficClass {
    /// Frames allowed per window
    #[must_use]
    pub const fn limit(self) -> u32 {
        match self {
            Self::General => 120,
            Self::Presence => 5,
        }
    }

    #[must_use]
    pub const fn interval(self) -> Duration {
        Duration::from_secs(60)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::General => "gateway.general",
            Self::Presence => "gateway.presence",
        }
    }
}
