//! # tether-gateway
//!
//! Client side of the streaming gateway: wire protocol, one [`Shard`] per
//! socket, and a [`ShardManager`] that runs a fixed set of shards behind one
//! merged event stream.

pub mod connection;
mod error;
mod events;
pub mod protocol;

pub use connection::{HeartbeatDriver, Shard, ShardManager, ShardStatus, TrafficClass};
pub use error::{GatewayError, GatewayResult};
pub use events::{DispatchEvent, ShardEvent, ShardEventKind};
pub use protocol::{CloseCode, GatewayMessage, OpCode};
