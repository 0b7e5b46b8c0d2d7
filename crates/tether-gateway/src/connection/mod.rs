//! Shard connections
//!
//! A [`Shard`] owns one socket at a time and drives it through the handshake,
//! heartbeating and reconnects. The [`ShardManager`] runs a fixed set of shards.

mod heartbeat;
mod manager;
mod session;
mod shard;
mod status;

pub use heartbeat::HeartbeatDriver;
pub use manager::ShardManager;
pub use shard::Shard;
pub use status::{ShardStatus, TrafficClass};
