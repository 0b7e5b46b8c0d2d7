//! Rate-limit response headers

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, DATE, RETRY_AFTER};
use std::time::Duration;
use tether_core::RateLimitUpdate;
use tokio::time::Instant;

const LIMIT: &str = "x-ratelimit-limit";
const REMAINING: &str = "x-ratelimit-remaining";
const RESET: &str = "x-ratelimit-reset";
const RESET_AFTER: &str = "x-ratelimit-reset-after";
const GLOBAL: &str = "x-ratelimit-global";

/// Longest wait a server value can impose
pub(crate) const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Rate-limit metadata read from one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Window end, epoch seconds
    pub reset: Option<f64>,
    /// Window end relative to the response, seconds
    pub reset_after: Option<f64>,
    /// Seconds to wait after a 429
    pub retry_after: Option<f64>,
    pub global: bool,
    /// Server clock at response time
    pub date: Option<DateTime<Utc>>,
}

impl RateLimitHeaders {
    /// Parse the rate-limit headers; absent or malformed values are `None`
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| header_text(headers, name);

        Self {
            limit: text(LIMIT).and_then(|v| v.parse().ok()),
            remaining: text(REMAINING).and_then(|v| v.parse().ok()),
            reset: text(RESET).and_then(|v| v.parse().ok()),
            reset_after: text(RESET_AFTER).and_then(|v| v.parse().ok()),
            retry_after: text(RETRY_AFTER.as_str()).and_then(|v| v.parse().ok()),
            global: text(GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true")),
            date: text(DATE.as_str())
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                .map(|d| d.with_timezone(&Utc)),
        }
    }

    /// Time until the window resets, measured against the server's clock
    ///
    /// Uses `reset - Date` so local clock skew does not matter; falls back to
    /// the local clock when the server sent no `Date`.
    pub fn reset_in(&self) -> Option<Duration> {
        let seconds = match (self.reset_after, self.reset) {
            (Some(after), _) => after,
            (None, Some(reset)) => {
                let server_now = self.date.unwrap_or_else(Utc::now);
                #[allow(clippy::cast_precision_loss)]
                let server_now = server_now.timestamp_millis() as f64 / 1000.0;
                reset - server_now
            }
            (None, None) => return None,
        };

        Some(seconds_to_duration(seconds))
    }

    /// Get `Retry-After` as a duration
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after.map(seconds_to_duration)
    }

    /// Build a bucket refill if the response carried a complete window
    pub fn update(&self, now: Instant) -> Option<RateLimitUpdate> {
        Some(RateLimitUpdate {
            limit: self.limit?,
            remaining: self.remaining?,
            reset_at: deadline(now, self.reset_in()?),
        })
    }
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Convert header seconds, clamped to `0..=MAX_WAIT`
pub(crate) fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).map_or(MAX_WAIT, |wait| wait.min(MAX_WAIT))
}

/// `now + wait`, saturating at `now + MAX_WAIT`
pub(crate) fn deadline(now: Instant, wait: Duration) -> Instant {
    now.checked_add(wait.min(MAX_WAIT))
        .or_else(|| now.checked_add(MAX_WAIT))
        .unwrap_or(now)
}
