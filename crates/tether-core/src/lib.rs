//! # tether-core
//!
//! Admission control primitives shared by the REST and gateway layers, and the
//! identifier type that appears on both wires. Nothing in here performs I/O.

pub mod ratelimit;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use ratelimit::{Bucket, BucketClosed, BucketSnapshot, Deferred, GlobalLock, Job, RateLimitUpdate};
pub use value_objects::{Snowflake, SnowflakeParseError};
