//! # tether-client
//!
//! One [`Client`] per bot token: a rate-limited REST [`Requester`] and the
//! gateway shards, configured from a single [`ClientConfig`].

mod client;
mod error;

pub use client::Client;
pub use error::{ClientError, ClientResult};

pub use tether_common::{try_init_tracing, ClientConfig, Environment, TracingConfig};
pub use tether_core::Snowflake;
pub use tether_gateway::{
    DispatchEvent, GatewayError, GatewayMessage, Shard, ShardEvent, ShardEventKind, ShardStatus,
    TrafficClass,
};
pub use tether_rest::{ApiRequest, Method, RequestError, Requester};
