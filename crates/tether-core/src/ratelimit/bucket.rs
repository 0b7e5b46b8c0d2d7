//! Token bucket with a FIFO admission queue
//!
//! Every bucket owns one worker task. Operations are submitted over a channel and
//! run one at a time in arrival order, so the counters are only ever written by
//! that worker. Nothing submitted is dropped: an exhausted bucket parks its queue
//! until the window resets.

use super::GlobalLock;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

/// Authoritative rate-limit counters reported by the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitUpdate {
    /// Operations allowed per window
    pub limit: u32,
    /// Operations left in the current window
    pub remaining: u32,
    /// When the current window ends
    pub reset_at: Instant,
}

/// Unit of work admitted through a bucket
///
/// The update a job resolves to, if any, is applied before the next queued job
/// is considered.
pub type Job = Box<dyn FnOnce() -> BoxFuture<'static, Option<RateLimitUpdate>> + Send>;

/// The bucket's worker is gone and no longer accepts work
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("bucket worker has shut down")]
pub struct BucketClosed;

/// Point-in-time view of a bucket's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Option<Instant>,
    /// Submitted operations that have not started yet
    pub queued: usize,
}

enum BucketCommand {
    Admit(Job),
    Refill(RateLimitUpdate),
}

#[derive(Debug)]
struct SlidingWindow {
    interval: Duration,
    admitted: VecDeque<Instant>,
}

#[derive(Debug)]
struct BucketState {
    limit: u32,
    remaining: u32,
    /// `None` while no window is known; admission is then unrestricted
    reset_at: Option<Instant>,
    /// Statically sized buckets keep a log of admissions so that no span of
    /// `interval` ever holds more than `limit` of them.
    window: Option<SlidingWindow>,
}

impl BucketState {
    fn fixed(limit: u32, interval: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            remaining: limit,
            reset_at: None,
            window: Some(SlidingWindow {
                interval,
                admitted: VecDeque::with_capacity(limit as usize),
            }),
        }
    }

    fn reported() -> Self {
        Self {
            limit: 1,
            remaining: 1,
            reset_at: None,
            window: None,
        }
    }

    /// Take a token, or return the instant at which one becomes available.
    fn try_acquire(&mut self, now: Instant) -> Result<(), Instant> {
        if let Some(window) = self.window.as_mut() {
            while window
                .admitted
                .front()
                .is_some_and(|&at| now.duration_since(at) >= window.interval)
            {
                window.admitted.pop_front();
            }

            if window.admitted.len() >= self.limit as usize {
                let oldest = window.admitted.front().copied().unwrap_or(now);
                return Err(oldest + window.interval);
            }

            window.admitted.push_back(now);
            self.remaining = self.limit - window.admitted.len() as u32;
            self.reset_at = window.admitted.front().map(|&at| at + window.interval);
            return Ok(());
        }

        if let Some(reset_at) = self.reset_at {
            if now >= reset_at {
                self.remaining = self.limit;
                self.reset_at = None;
            } else if self.remaining == 0 {
                return Err(reset_at);
            }
        }

        self.remaining = self.remaining.saturating_sub(1);
        Ok(())
    }

    /// Overwrite the counters with server-reported values.
    ///
    /// A refill hands a statically sized bucket over to reported counters.
    fn refill(&mut self, update: RateLimitUpdate) {
        self.limit = update.limit.max(1);
        self.remaining = update.remaining;
        self.reset_at = Some(update.reset_at);
        self.window = None;
    }
}

struct Worker {
    name: Arc<str>,
    state: Arc<Mutex<BucketState>>,
    queued: Arc<AtomicUsize>,
    gate: Option<GlobalLock>,
    rx: mpsc::UnboundedReceiver<BucketCommand>,
}

impl Worker {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                BucketCommand::Refill(update) => self.state.lock().refill(update),
                BucketCommand::Admit(job) => {
                    self.acquire().await;
                    self.queued.fetch_sub(1, Ordering::AcqRel);

                    if let Some(update) = job().await {
                        self.state.lock().refill(update);
                    }
                }
            }
        }

        tracing::trace!(bucket = %self.name, "Bucket worker stopped");
    }

    async fn acquire(&self) {
        loop {
            if let Some(gate) = &self.gate {
                gate.released().await;
            }

            let attempt = self.state.lock().try_acquire(Instant::now());
            match attempt {
                Ok(()) => return,
                Err(ready_at) => {
                    tracing::debug!(
                        bucket = %self.name,
                        wait_ms = ready_at.saturating_duration_since(Instant::now()).as_millis(),
                        queued = self.queued.load(Ordering::Acquire),
                        "Bucket exhausted, holding queue"
                    );
                    sleep_until(ready_at).await;
                }
            }
        }
    }
}

/// Handle to a rate-limited serial queue
///
/// Cloning is cheap; all clones feed the same worker. The worker drains what is
/// already queued and exits once every handle is dropped.
#[derive(Clone)]
pub struct Bucket {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<BucketCommand>,
    state: Arc<Mutex<BucketState>>,
    queued: Arc<AtomicUsize>,
}

impl Bucket {
    /// Create a bucket admitting at most `limit` operations per `interval`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn fixed(name: impl Into<Arc<str>>, limit: u32, interval: Duration) -> Self {
        Self::spawn(name.into(), BucketState::fixed(limit, interval), None)
    }

    /// Create a bucket driven by server-reported counters.
    ///
    /// Nothing is dequeued while `gate` is engaged. Until the first refill the
    /// bucket only serializes.
    pub fn reported(name: impl Into<Arc<str>>, gate: GlobalLock) -> Self {
        Self::spawn(name.into(), BucketState::reported(), Some(gate))
    }

    fn spawn(name: Arc<str>, state: BucketState, gate: Option<GlobalLock>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(state));
        let queued = Arc::new(AtomicUsize::new(0));

        let worker = Worker {
            name: name.clone(),
            state: state.clone(),
            queued: queued.clone(),
            gate,
            rx,
        };
        tokio::spawn(worker.run());

        Self {
            name,
            tx,
            state,
            queued,
        }
    }

    /// Get the bucket name (route key or traffic class)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job behind everything already submitted
    pub fn submit(&self, job: Job) -> Result<(), BucketClosed> {
        self.queued.fetch_add(1, Ordering::AcqRel);
        self.tx.send(BucketCommand::Admit(job)).map_err(|_| {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            BucketClosed
        })
    }

    /// Run `operation` once admitted and wait for its output
    pub async fn admit<F, Fut, T>(&self, operation: F) -> Result<T, BucketClosed>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move || {
            Box::pin(async move {
                let _ = tx.send(operation().await);
                None
            })
        }))?;

        rx.await.map_err(|_| BucketClosed)
    }

    /// Overwrite the counters once everything queued before this call has run
    pub fn refill(&self, update: RateLimitUpdate) -> Result<(), BucketClosed> {
        self.tx
            .send(BucketCommand::Refill(update))
            .map_err(|_| BucketClosed)
    }

    /// Get a snapshot of the current counters
    pub fn snapshot(&self) -> BucketSnapshot {
        let state = self.state.lock();
        BucketSnapshot {
            limit: state.limit,
            remaining: state.remaining,
            reset_at: state.reset_at,
            queued: self.queued.load(Ordering::Acquire),
        }
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("limit", &snapshot.limit)
            .field("remaining", &snapshot.remaining)
            .field("queued", &snapshot.queued)
            .finish()
    }
}
