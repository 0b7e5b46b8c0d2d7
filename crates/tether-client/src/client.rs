//! Client facade

use crate::error::{ClientError, ClientResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tether_common::ClientConfig;
use tether_gateway::{GatewayMessage, Shard, ShardEvent, ShardManager, TrafficClass};
use tether_rest::{ApiRequest, Requester};
use tokio::sync::mpsc;

/// Bot client
///
/// The REST side is usable right away; the gateway starts on [`Client::connect`].
pub struct Client {
    config: ClientConfig,
    requester: Requester,
    shards: Mutex<Option<Arc<ShardManager>>>,
    events: Mutex<Option<mpsc::Receiver<ShardEvent>>>,
}

impl Client {
    /// Create a client backed by `reqwest`
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let requester = Requester::new(config.token.clone(), config.rest.clone())?;
        Ok(Self::with_requester(config, requester))
    }

    /// Create a client from environment variables
    pub fn from_env() -> ClientResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Create a client around an existing requester
    pub fn with_requester(config: ClientConfig, requester: Requester) -> Self {
        Self {
            config,
            requester,
            shards: Mutex::new(None),
            events: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    /// Perform a REST call
    pub async fn request(&self, request: ApiRequest) -> ClientResult<Option<Value>> {
        Ok(self.requester.request(request).await?)
    }

    /// Start the gateway shards
    ///
    /// The gateway URL and shard count come from configuration when both are
    /// set; otherwise they are fetched with `GET /gateway/bot`, and any
    /// configured value overrides the fetched one.
    pub async fn connect(&self) -> ClientResult<()> {
        if self.shards.lock().is_some() {
            return Err(tether_gateway::GatewayError::AlreadyStarted.into());
        }

        let gateway = &self.config.gateway;
        let (url, shard_count) = match (&gateway.url, gateway.shard_count) {
            (Some(url), Some(count)) => (url.clone(), count),
            (url, count) => {
                let info = self.requester.get_gateway_bot().await?;
                tracing::info!(
                    url = %info.url,
                    recommended_shards = info.shards,
                    sessions_remaining = info.session_start_limit.remaining,
                    "Fetched gateway bootstrap"
                );
                (
                    url.clone().unwrap_or(info.url),
                    count.unwrap_or(info.shards),
                )
            }
        };

        let manager = Arc::new(ShardManager::new(
            self.config.token.clone(),
            url,
            gateway.clone(),
        ));
        let events = manager.start(shard_count)?;

        // A concurrent connect may have won the race while bootstrapping
        let lost_race = {
            let mut shards = self.shards.lock();
            let taken = shards.is_some();
            if !taken {
                *shards = Some(manager.clone());
            }
            taken
        };
        if lost_race {
            manager.stop().await;
            return Err(tether_gateway::GatewayError::AlreadyStarted.into());
        }
        *self.events.lock() = Some(events);

        Ok(())
    }

    /// Take the merged event stream; only the first call after `connect` gets it
    pub fn events(&self) -> Option<mpsc::Receiver<ShardEvent>> {
        self.events.lock().take()
    }

    /// Get a shard handle
    pub fn shard(&self, shard_id: u32) -> ClientResult<Shard> {
        let manager = self.manager()?;
        manager
            .shard(shard_id)
            .ok_or(ClientError::UnknownShard(shard_id))
    }

    /// Send a frame on one shard through the bucket of `class`
    pub async fn send_gateway_frame(
        &self,
        shard_id: u32,
        frame: &GatewayMessage,
        class: TrafficClass,
    ) -> ClientResult<()> {
        let shard = self.shard(shard_id)?;
        Ok(shard.send(frame, class).await?)
    }

    /// Stop every shard; REST calls keep working
    pub async fn shutdown(&self) {
        // Drop an untaken stream first so shards never wait on it
        self.events.lock().take();
        let manager = self.shards.lock().take();
        if let Some(manager) = manager {
            manager.stop().await;
        }
    }

    fn manager(&self) -> ClientResult<Arc<ShardManager>> {
        self.shards.lock().clone().ok_or(ClientError::NotConnected)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("requester", &self.requester)
            .field("shards", &*self.shards.lock())
            .finish()
    }
}
