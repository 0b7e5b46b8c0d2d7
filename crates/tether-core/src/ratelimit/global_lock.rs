//! Process-wide REST gate
//!
//! Engaged when the server reports a global rate limit. While engaged, new work
//! is deferred and no bucket dequeues; release flushes the deferred work in the
//! order it arrived.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Work parked while the lock is engaged
///
/// Deferred work runs while the lock's state is held, so it must not block or
/// call back into the same lock.
pub type Deferred = Box<dyn FnOnce() + Send>;

/// Engagement used when the requested one overflows the clock
const MAX_ENGAGEMENT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Default)]
struct LockState {
    until: Option<Instant>,
    deferred: VecDeque<Deferred>,
}

struct Inner {
    state: Mutex<LockState>,
    engaged: watch::Sender<bool>,
}

/// Global rate-limit gate, one per requester
#[derive(Clone)]
pub struct GlobalLock {
    inner: Arc<Inner>,
}

impl GlobalLock {
    /// Create a released lock
    #[must_use]
    pub fn new() -> Self {
        let (engaged, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LockState::default()),
                engaged,
            }),
        }
    }

    /// Check whether the lock is currently engaged
    pub fn is_engaged(&self) -> bool {
        self.inner.state.lock().until.is_some()
    }

    /// Get the instant the lock is due to release, if engaged
    pub fn engaged_until(&self) -> Option<Instant> {
        self.inner.state.lock().until
    }

    /// Number of operations waiting for release
    pub fn deferred_len(&self) -> usize {
        self.inner.state.lock().deferred.len()
    }

    /// Engage for `duration`, scheduling the release.
    ///
    /// Engaging while engaged extends the deadline when the new one is later;
    /// it never shortens it and never schedules a second release.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn engage(&self, duration: Duration) {
        let now = Instant::now();
        let until = now
            .checked_add(duration)
            .or_else(|| now.checked_add(MAX_ENGAGEMENT))
            .unwrap_or(now);
        let mut state = self.inner.state.lock();

        match state.until {
            Some(current) if current >= until => {}
            Some(_) => {
                tracing::debug!(retry_after_ms = duration.as_millis(), "Global rate limit extended");
                state.until = Some(until);
            }
            None => {
                tracing::warn!(retry_after_ms = duration.as_millis(), "Global rate limit engaged");
                state.until = Some(until);
                self.inner.engaged.send_replace(true);
                tokio::spawn(self.clone().release_at_deadline());
            }
        }
    }

    async fn release_at_deadline(self) {
        loop {
            let Some(until) = self.engaged_until() else {
                return;
            };

            if Instant::now() >= until {
                self.release();
                return;
            }

            sleep_until(until).await;
        }
    }

    /// Clear the lock and run every deferred operation in FIFO order
    pub fn release(&self) {
        let mut state = self.inner.state.lock();
        let was_engaged = state.until.take().is_some();
        self.inner.engaged.send_replace(false);

        let deferred = std::mem::take(&mut state.deferred);
        if was_engaged {
            tracing::info!(deferred = deferred.len(), "Global rate limit released");
        }

        // Flushed under the lock so nothing submitted afterwards can overtake.
        for operation in deferred {
            operation();
        }
    }

    /// Run `operation` now, or park it until release if engaged
    pub fn run_or_defer(&self, operation: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        if state.until.is_some() {
            state.deferred.push_back(Box::new(operation));
            return;
        }
        drop(state);

        operation();
    }

    /// Wait until the lock is released (returns immediately when it is not engaged)
    pub async fn released(&self) {
        let mut rx = self.inner.engaged.subscribe();
        let _ = rx.wait_for(|engaged| !*engaged).await;
    }
}

impl Default for GlobalLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GlobalLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("GlobalLock")
            .field("until", &state.until)
            .field("deferred", &state.deferred.len())
            .finish()
    }
}
