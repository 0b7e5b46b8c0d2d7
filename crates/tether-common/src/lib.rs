//! # tether-common
//!
//! Shared utilities: configuration loading and tracing setup.

pub mod config;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{ClientConfig, ConfigError, Environment, GatewayConfig, RestConfig};
pub use telemetry::{try_init_tracing, TracingConfig, TracingError};
