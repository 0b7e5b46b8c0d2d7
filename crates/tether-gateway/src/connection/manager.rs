//! Shard manager
//!
//! Starts a fixed set of shards, spaces out their identify frames, and merges
//! their events into one stream. Shards never observe each other: a fatal
//! close on one leaves the rest running.

use super::shard::Shard;
use super::status::ShardStatus;
use crate::error::{GatewayError, GatewayResult};
use crate::events::ShardEvent;
use parking_lot::Mutex;
use tether_common::GatewayConfig;
use tether_core::Bucket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Running {
    shards: Vec<Shard>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owner of every shard of one client
pub struct ShardManager {
    token: String,
    url: String,
    config: GatewayConfig,
    running: Mutex<Option<Running>>,
}

impl ShardManager {
    /// Create a manager for shards connecting to `url`
    pub fn new(token: impl Into<String>, url: impl Into<String>, config: GatewayConfig) -> Self {
        Self {
            token: token.into(),
            url: url.into(),
            config,
            running: Mutex::new(None),
        }
    }

    /// Start `shard_count` shards and return the merged event stream
    ///
    /// Identify frames are admitted one per `identify_spacing`, in shard order.
    /// The stream ends once every shard has emitted its terminal event.
    pub fn start(&self, shard_count: u32) -> GatewayResult<mpsc::Receiver<ShardEvent>> {
        if shard_count == 0 {
            return Err(GatewayError::InvalidShardCount);
        }

        let mut running = self.running.lock();
        if running.is_some() {
            return Err(GatewayError::AlreadyStarted);
        }

        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let identify_queue = Bucket::fixed("gateway.identify", 1, self.config.identify_spacing());

        let shards: Vec<Shard> = (0..shard_count)
            .map(|id| {
                Shard::build(
                    id,
                    shard_count,
                    self.token.clone(),
                    self.url.clone(),
                    self.config.clone(),
                    Some(identify_queue.clone()),
                )
            })
            .collect();
        let tasks = shards.iter().map(|shard| shard.start(tx.clone())).collect();

        tracing::info!(
            shards = shard_count,
            identify_spacing_ms = self.config.identify_spacing_ms,
            "Shards started"
        );

        *running = Some(Running { shards, tasks });
        Ok(rx)
    }

    /// Get a shard by id
    pub fn shard(&self, id: u32) -> Option<Shard> {
        self.running
            .lock()
            .as_ref()
            .and_then(|running| running.shards.get(id as usize).cloned())
    }

    /// Get the number of running shards
    pub fn shard_count(&self) -> u32 {
        self.running
            .lock()
            .as_ref()
            .map_or(0, |running| running.shards.len() as u32)
    }

    /// Get the status of every shard, by id
    pub fn statuses(&self) -> Vec<(u32, ShardStatus)> {
        self.running.lock().as_ref().map_or_else(Vec::new, |running| {
            running
                .shards
                .iter()
                .map(|shard| (shard.id(), shard.status()))
                .collect()
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Stop every shard and wait for their loops to finish
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        for shard in &running.shards {
            shard.stop();
        }
        for task in running.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Shard task ended abnormally");
            }
        }

        tracing::info!(shards = running.shards.len(), "All shards stopped");
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("url", &self.url)
            .field("shards", &self.shard_count())
            .finish()
    }
}
