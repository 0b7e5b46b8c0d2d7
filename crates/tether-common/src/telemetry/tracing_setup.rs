//! Tracing and logging setup
//!
//! The runtime only emits `tracing` events; installing a subscriber is left to
//! the host. [`try_init_tracing`] is a convenience for bots that own their
//! process.

use crate::config::Environment;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Crates whose events the default filter raises to `level`
const RUNTIME_TARGETS: &[&str] = &[
    "tether_core",
    "tether_rest",
    "tether_gateway",
    "tether_client",
];

/// Subscriber options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for the runtime's own crates when `RUST_LOG` is unset
    pub level: Level,
    /// Level for every other crate (HTTP and WebSocket stacks included)
    pub dependency_level: Level,
    /// One JSON object per line instead of human-readable output
    pub json: bool,
    /// Log heartbeats and bucket admissions at `trace`
    pub wire_trace: bool,
    /// Emit span open/close events
    pub span_events: bool,
    pub file_line: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            dependency_level: Level::WARN,
            json: false,
            wire_trace: false,
            span_events: false,
            file_line: false,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            span_events: true,
            file_line: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn production() -> Self {
        Self {
            json: true,
            ..Self::default()
        }
    }

    /// Pick the preset matching a deployment environment
    #[must_use]
    pub fn for_environment(env: Environment) -> Self {
        match env {
            Environment::Development => Self::development(),
            Environment::Production => Self::production(),
            Environment::Staging => Self::default(),
        }
    }

    /// Filter directives used when `RUST_LOG` is unset
    pub fn directives(&self) -> String {
        let runtime_level = if self.wire_trace {
            Level::TRACE
        } else {
            self.level
        };

        let mut directives = vec![self.dependency_level.to_string().to_lowercase()];
        directives.extend(
            RUNTIME_TARGETS
                .iter()
                .map(|target| format!("{target}={}", runtime_level.to_string().to_lowercase())),
        );
        directives.join(",")
    }
}

/// Install a global subscriber
///
/// `RUST_LOG` takes precedence over the configured levels. Fails instead of
/// panicking when the host already installed one.
pub fn try_init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .map_err(|e| TracingError::InvalidFilter(e.to_string()))?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let layer = fmt::layer()
        .with_file(config.file_line)
        .with_line_number(config.file_line)
        .with_span_events(span_events);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
    installed.map_err(|_| TracingError::AlreadyInitialized)
}

/// Tracing initialization errors
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Tracing subscriber already initialized")]
    AlreadyInitialized,

    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
}
