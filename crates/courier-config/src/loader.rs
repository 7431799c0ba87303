//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "application.toml",
    "courier.toml",
    "./config/config.toml",
    "./config/application.toml",
    "/etc/courier/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        // Start with defaults
        let mut config = AppConfig::default();

        // Try to load from file
        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        // Apply environment variable overrides
        self.apply_env_overrides(&mut config);

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        // Check explicit path first
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        // Check COURIER_CONFIG env var
        if let Ok(path) = env::var("COURIER_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // Search standard paths
        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // HTTP
        if let Ok(val) = env::var("COURIER_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("COURIER_HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = env::var("COURIER_CORS_ORIGINS") {
            config.http.cors_origins = val.split(',').map(|s| s.trim().to_string()).collect();
        }

        // Redis
        if let Ok(val) = env::var("COURIER_REDIS_URL") {
            config.redis.url = val;
        }
        if let Ok(val) = env::var("COURIER_REDIS_POOL_SIZE") {
            if let Ok(size) = val.parse() {
                config.redis.pool_size = size;
            }
        }
        if let Ok(val) = env::var("COURIER_REDIS_COMMAND_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.redis.command_timeout_secs = secs;
            }
        }

        // Queue / throttling
        if let Ok(val) = env::var("COURIER_QUEUE_DETHROTTLE_INTERVAL_MS") {
            if let Ok(ms) = val.parse() {
                config.queue.dethrottle_interval_ms = ms;
            }
        }
        if let Ok(val) = env::var("COURIER_QUEUE_WATCHDOG_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                config.queue.watchdog_interval_secs = secs;
            }
        }
        if let Ok(val) = env::var("COURIER_QUEUE_RATE_COUNTER_TTL_SECS") {
            if let Ok(secs) = val.parse() {
                config.queue.rate_counter_ttl_secs = secs;
            }
        }

        // Spool
        if let Ok(val) = env::var("COURIER_SPOOL_DIR") {
            config.spool.dir = val;
        }
        if let Ok(val) = env::var("COURIER_SPOOL_SWEEP_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                config.spool.sweep_interval_secs = secs;
            }
        }

        // Dispatch
        if let Ok(val) = env::var("COURIER_DISPATCH_DEFAULT_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                config.dispatch.default_concurrency = n;
            }
        }
        if let Ok(val) = env::var("COURIER_DISPATCH_IDLE_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.dispatch.idle_timeout_secs = secs;
            }
        }
        if let Ok(val) = env::var("COURIER_DISPATCH_SEND_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.dispatch.send_timeout_secs = secs;
            }
        }
        if let Ok(val) = env::var("COURIER_DISPATCH_MAX_RETRY_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                config.dispatch.max_retry_attempts = n;
            }
        }

        // Webhook
        if let Ok(val) = env::var("COURIER_WEBHOOK_DEDUP_TTL_SECS") {
            if let Ok(secs) = val.parse() {
                config.webhook.dedup_ttl_secs = secs;
            }
        }
        if let Ok(val) = env::var("COURIER_WEBHOOK_MULTIPART_TTL_SECS") {
            if let Ok(secs) = val.parse() {
                config.webhook.multipart_ttl_secs = secs;
            }
        }

        // Circuit breaker
        if let Ok(val) = env::var("COURIER_CIRCUIT_BREAKER_ENABLED") {
            config.circuit_breaker.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("COURIER_CIRCUIT_BREAKER_FAILURE_THRESHOLD") {
            if let Ok(n) = val.parse() {
                config.circuit_breaker.failure_threshold = n;
            }
        }
        if let Ok(val) = env::var("COURIER_CIRCUIT_BREAKER_RESET_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.circuit_breaker.reset_timeout_secs = secs;
            }
        }

        // General
        if let Ok(val) = env::var("COURIER_DATA_DIR") {
            config.data_dir = val;
        }
        if let Ok(val) = env::var("COURIER_DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_explicit_path_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, AppConfig::example_toml()).unwrap();

        let loader = ConfigLoader::with_path(&path);
        let config = loader.load().unwrap();
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loader = ConfigLoader::with_path("/nonexistent/path/config.toml");
        let config = loader.load().unwrap();
        assert_eq!(config.spool.sweep_interval_secs, 30);
    }
}
