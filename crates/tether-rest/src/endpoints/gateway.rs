//! Gateway bootstrap endpoints

use super::decode;
use crate::error::RequestResult;
use crate::request::ApiRequest;
use crate::requester::Requester;
use serde::{Deserialize, Serialize};

/// Response of `GET /gateway`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub url: String,
}

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotGatewayInfo {
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Identify budget for the current day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` resets
    pub reset_after: u64,
    /// Identify frames allowed per 5-second window
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_max_concurrency() -> u32 {
    1
}

impl Requester {
    /// Fetch the gateway URL; needs no token and bypasses route buckets
    pub async fn get_gateway(&self) -> RequestResult<GatewayInfo> {
        let payload = self
            .request(ApiRequest::get("/gateway").unauthenticated().unlimited())
            .await?;
        decode(payload)
    }

    /// Fetch the gateway URL with the recommended shard count
    pub async fn get_gateway_bot(&self) -> RequestResult<BotGatewayInfo> {
        let payload = self.request(ApiRequest::get("/gateway/bot")).await?;
        decode(payload)
    }
}
