//! Heartbeat driver
//!
//! Sends a heartbeat every interval carrying the latest sequence. The driver
//! does not look at acknowledgements; it reports each beat to its shard, which
//! decides whether the connection has gone stale.

use crate::protocol::GatewayMessage;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;

/// Shortest period the driver will beat at
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Periodic heartbeat task bound to one socket
///
/// Dropping the driver cancels it.
#[derive(Debug)]
pub struct HeartbeatDriver {
    interval: Duration,
    task: JoinHandle<()>,
}

impl HeartbeatDriver {
    /// Start beating; the first heartbeat goes out one `interval` from now
    ///
    /// `beats` receives one message per heartbeat written to `outbound`.
    pub fn start(
        shard_id: u32,
        interval: Duration,
        sequence: watch::Receiver<Option<u64>>,
        outbound: mpsc::UnboundedSender<Message>,
        beats: mpsc::UnboundedSender<()>,
    ) -> Self {
        let period = interval.max(MIN_INTERVAL);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let seq = *sequence.borrow();
                let Ok(text) = GatewayMessage::heartbeat(seq).to_json() else {
                    continue;
                };
                if outbound.send(Message::Text(text.into())).is_err() {
                    break;
                }
                tracing::trace!(shard = shard_id, seq = ?seq, "Heartbeat sent");

                if beats.send(()).is_err() {
                    break;
                }
            }

            tracing::trace!(shard = shard_id, "Heartbeat driver stopped");
        });

        Self { interval, task }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Cancel the driver
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for HeartbeatDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}
