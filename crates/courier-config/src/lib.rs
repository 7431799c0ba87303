//! Courier Configuration System
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Environment variable error: {0}")]
    EnvError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub redis: RedisConfig,
    pub queue: QueueConfig,
    pub spool: SpoolConfig,
    pub dispatch: DispatchConfig,
    pub webhook: WebhookConfig,
    pub circuit_breaker: CircuitBreakerConfig,

    /// Data directory for local storage (spool root, etc.)
    pub data_dir: String,

    /// Enable development mode (in-memory backend, verbose logging)
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            redis: RedisConfig::default(),
            queue: QueueConfig::default(),
            spool: SpoolConfig::default(),
            dispatch: DispatchConfig::default(),
            webhook: WebhookConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            data_dir: "./data".to_string(),
            dev_mode: false,
        }
    }
}

/// HTTP server configuration (webhook ingestion + monitoring API)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["http://localhost:4200".to_string()],
        }
    }
}

/// Redis configuration - backs the priority queue, throttling sets, dedup
/// keys, and multipart reassembly buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: usize,
    /// Timeout for individual Redis round-trips, in seconds.
    pub command_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            command_timeout_secs: 5,
        }
    }
}

/// Priority queue / throttling coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// TTL on the per-second `Q:tps:<unix_second>` rate counter key.
    pub rate_counter_ttl_secs: u64,
    /// Dethrottler tick interval; spec mandates 1 Hz, aligned to second boundaries.
    pub dethrottle_interval_ms: u64,
    /// Watchdog sweep interval for stuck `T:active` accounting.
    pub watchdog_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            rate_counter_ttl_secs: 10,
            dethrottle_interval_ms: 1000,
            watchdog_interval_secs: 60,
        }
    }
}

/// Filesystem spool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    /// Directory holding `msgs/`, `statuses/`, `events/` subfolders, relative
    /// to `data_dir` unless absolute.
    pub dir: String,
    /// Sweep interval for the spool flusher walker.
    pub sweep_interval_secs: u64,
    /// File mode applied to spooled records (octal, e.g. 0640).
    pub file_mode: u32,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            dir: "spool".to_string(),
            sweep_interval_secs: 30,
            file_mode: 0o640,
        }
    }
}

/// Per-channel Sender worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Default concurrency per channel worker, absent a channel-specific override.
    pub default_concurrency: u32,
    /// Idle timeout before a channel's worker task shuts itself down.
    pub idle_timeout_secs: u64,
    /// Multiplier applied to concurrency to size a channel's bounded queue.
    pub queue_capacity_multiplier: u32,
    /// Floor on a channel's queue capacity regardless of concurrency.
    pub min_queue_capacity: u32,
    /// HTTP send timeout for adapter dispatch calls.
    pub send_timeout_secs: u64,
    /// Maximum retryable attempts before a message is marked Failed.
    pub max_retry_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 5,
            idle_timeout_secs: 300,
            queue_capacity_multiplier: 2,
            min_queue_capacity: 50,
            send_timeout_secs: 30,
            max_retry_attempts: 5,
        }
    }
}

/// Webhook ingestion / incoming pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// TTL on the `seen:<channelUUID>:<externalID>` dedup key.
    pub dedup_ttl_secs: u64,
    /// TTL on multipart long-SMS reassembly hashes.
    pub multipart_ttl_secs: u64,
    /// HTTP timeout applied to inbound ack callbacks the pipeline issues.
    pub ack_timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            dedup_ttl_secs: 86400,
            multipart_ttl_secs: 300,
            ack_timeout_secs: 15,
        }
    }
}

/// Per-channel circuit breaker defaults guarding outbound HTTP dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 10,
            success_threshold: 5,
            reset_timeout_secs: 5,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        let loader = ConfigLoader::new();
        loader.load()
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Courier Configuration
# Environment variables override these settings

[http]
port = 8080
host = "0.0.0.0"
cors_origins = ["http://localhost:4200"]

[redis]
url = "redis://localhost:6379"
pool_size = 10
command_timeout_secs = 5

[queue]
rate_counter_ttl_secs = 10
dethrottle_interval_ms = 1000
watchdog_interval_secs = 60

[spool]
dir = "spool"
sweep_interval_secs = 30
file_mode = 416  # 0640 in decimal

[dispatch]
default_concurrency = 5
idle_timeout_secs = 300
queue_capacity_multiplier = 2
min_queue_capacity = 50
send_timeout_secs = 30
max_retry_attempts = 5

[webhook]
dedup_ttl_secs = 86400
multipart_ttl_secs = 300
ack_timeout_secs = 15

[circuit_breaker]
enabled = true
failure_threshold = 10
success_threshold = 5
reset_timeout_secs = 5

data_dir = "./data"
dev_mode = false
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.http.port, config.http.port);
        assert_eq!(parsed.queue.dethrottle_interval_ms, 1000);
    }

    #[test]
    fn example_toml_parses() {
        let config: AppConfig = toml::from_str(&AppConfig::example_toml()).unwrap();
        assert_eq!(config.spool.sweep_interval_secs, 30);
        assert_eq!(config.webhook.dedup_ttl_secs, 86400);
    }
}
