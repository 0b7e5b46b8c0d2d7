//! Client configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file if present).

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main client configuration
#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    /// Bot token, sent as `Authorization: Bot <token>` and in identify frames
    pub token: String,
    #[serde(default)]
    pub env: Environment,
    #[serde(default)]
    pub rest: RestConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// REST client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Fixed delay before a request that hit a 5xx is sent again
    #[serde(default = "default_server_error_retry_delay_ms")]
    pub server_error_retry_delay_ms: u64,
    /// `None` retries server errors indefinitely
    #[serde(default = "default_max_server_error_retries")]
    pub max_server_error_retries: Option<u32>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl RestConfig {
    #[must_use]
    pub fn server_error_retry_delay(&self) -> Duration {
        Duration::from_millis(self.server_error_retry_delay_ms)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            server_error_retry_delay_ms: default_server_error_retry_delay_ms(),
            max_server_error_retries: default_max_server_error_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Skip the bootstrap call and connect here
    #[serde(default)]
    pub url: Option<String>,
    /// `None` uses the shard count recommended by the bootstrap call
    #[serde(default)]
    pub shard_count: Option<u32>,
    /// Minimum spacing between identify frames across shards
    #[serde(default = "default_identify_spacing_ms")]
    pub identify_spacing_ms: u64,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u32,
    #[serde(default)]
    pub compress: bool,
    /// Pause before re-dialing after a recoverable drop
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Capacity of the merged event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl GatewayConfig {
    #[must_use]
    pub fn identify_spacing(&self) -> Duration {
        Duration::from_millis(self.identify_spacing_ms)
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            shard_count: None,
            identify_spacing_ms: default_identify_spacing_ms(),
            large_threshold: default_large_threshold(),
            compress: false,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

// Default value functions
fn default_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_user_agent() -> String {
    format!(
        "DiscordBot (https://github.com/tether-rs/tether, {})",
        env!("CARGO_PKG_VERSION")
    )
}

fn default_server_error_retry_delay_ms() -> u64 {
    3000
}

#[allow(clippy::unnecessary_wraps)]
fn default_max_server_error_retries() -> Option<u32> {
    Some(5)
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_identify_spacing_ms() -> u64 {
    5000
}

fn default_large_threshold() -> u32 {
    250
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_event_buffer() -> usize {
    1024
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            env: Environment::default(),
            rest: RestConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `BOT_TOKEN` is missing or a variable fails to parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// # Errors
    /// Returns an error if `BOT_TOKEN` is missing or a variable fails to parse
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("BOT_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingVar("BOT_TOKEN"))?;

        let env = match lookup("APP_ENV").map(|s| s.to_lowercase()).as_deref() {
            None | Some("development") => Environment::Development,
            Some("staging") => Environment::Staging,
            Some("production") => Environment::Production,
            Some(other) => return Err(ConfigError::InvalidValue("APP_ENV", other.to_string())),
        };

        let max_server_error_retries = match lookup("API_MAX_SERVER_ERROR_RETRIES").as_deref() {
            None => default_max_server_error_retries(),
            Some("unlimited") => None,
            Some(raw) => Some(parse_var("API_MAX_SERVER_ERROR_RETRIES", raw)?),
        };

        Ok(Self {
            token,
            env,
            rest: RestConfig {
                base_url: lookup("API_BASE_URL").unwrap_or_else(default_base_url),
                user_agent: lookup("API_USER_AGENT").unwrap_or_else(default_user_agent),
                server_error_retry_delay_ms: parse_or(
                    &lookup,
                    "API_SERVER_ERROR_RETRY_DELAY_MS",
                    default_server_error_retry_delay_ms,
                )?,
                max_server_error_retries,
                timeout_secs: parse_or(&lookup, "API_TIMEOUT_SECS", default_timeout_secs)?,
            },
            gateway: GatewayConfig {
                url: lookup("GATEWAY_URL"),
                shard_count: lookup("GATEWAY_SHARD_COUNT")
                    .map(|raw| parse_var("GATEWAY_SHARD_COUNT", &raw))
                    .transpose()?,
                identify_spacing_ms: parse_or(
                    &lookup,
                    "GATEWAY_IDENTIFY_SPACING_MS",
                    default_identify_spacing_ms,
                )?,
                large_threshold: parse_or(&lookup, "GATEWAY_LARGE_THRESHOLD", default_large_threshold)?,
                compress: parse_or(&lookup, "GATEWAY_COMPRESS", || false)?,
                reconnect_delay_ms: parse_or(
                    &lookup,
                    "GATEWAY_RECONNECT_DELAY_MS",
                    default_reconnect_delay_ms,
                )?,
                event_buffer: parse_or(&lookup, "GATEWAY_EVENT_BUFFER", default_event_buffer)?,
            },
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key, raw.to_string()))
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: impl FnOnce() -> T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => parse_var(key, &raw),
        None => Ok(default()),
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("token", &"[REDACTED]")
            .field("env", &self.env)
            .field("rest", &self.rest)
            .field("gateway", &self.gateway)
            .finish()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
