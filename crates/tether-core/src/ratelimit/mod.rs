//! Rate limiting
//!
//! [`Bucket`] is a serial admission queue with a token budget per window.
//! [`GlobalLock`] sits above every REST bucket and defers all traffic while the
//! server reports a global rate limit.

mod bucket;
mod global_lock;

pub use bucket::{Bucket, BucketClosed, BucketSnapshot, Job, RateLimitUpdate};
pub use global_lock::{Deferred, GlobalLock};
