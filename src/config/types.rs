//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Listening socket settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Active health probing settings
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Load balancing strategy settings
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Upstream backend definitions
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Per-backend circuit breaker settings
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry settings for idempotent requests
    #[serde(default)]
    pub retry: RetryConfig,

    /// Metrics pipeline settings
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Listening socket configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address and port to listen on
    #[serde(default = "default_listen_address")]
    pub address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
        }
    }
}

/// Active health probing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    /// How often each backend is probed
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
        }
    }
}

/// Load balancing strategy configuration.
///
/// `type` is a free-form string so an unknown name can fall back to
/// round-robin with a warning instead of failing deserialization.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// One of: round-robin, random, least-conn, least-response,
    /// consistent_hash, weighted-round-robin
    #[serde(rename = "type", default = "default_strategy")]
    pub strategy_type: String,

    /// Ring positions per backend; applies to consistent_hash only
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            strategy_type: default_strategy(),
            virtual_nodes: default_virtual_nodes(),
        }
    }
}

/// One upstream backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Absolute base URL, http or https
    pub url: String,

    /// Weight for weighted strategies (default: 1)
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    /// Whether circuit breaking is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the breaker stays open before admitting a probe
    #[serde(default = "default_reset_timeout", with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            reset_timeout: default_reset_timeout(),
        }
    }
}

/// Retry configuration for idempotent requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Additional attempts after the first, idempotent methods only
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

/// Metrics pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Bounded event channel capacity; events are dropped when full
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_listen_address() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_health_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_strategy() -> String {
    "round-robin".to_string()
}

fn default_virtual_nodes() -> usize {
    100
}

fn default_weight() -> u32 {
    1
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    1
}

fn default_event_buffer() -> usize {
    1000
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
