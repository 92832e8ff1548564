use serde::Deserialize;
use std::path::Path;

use crate::state::DEFAULT_WINDOW_CAPACITY;

// Re-export push channel config alongside the rest
pub use crate::nats::PushConfig;

/// Complete herdwatch configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HerdConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// History/list API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_api_base_url() -> String {
    std::env::var("HERDWATCH_API_URL").unwrap_or_else(|_| "http://192.168.1.10:5000".to_string())
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Per-metric sliding window configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_capacity")]
    pub capacity: usize,
}

fn default_window_capacity() -> usize {
    DEFAULT_WINDOW_CAPACITY
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: default_window_capacity(),
        }
    }
}

/// Snapshot refresh policy
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Periodic snapshot interval (seconds); 0 disables periodic refresh
    #[serde(default = "default_refresh_interval")]
    pub interval_seconds: u64,
    /// Delays between retries after a failed fetch
    #[serde(default = "default_retry_delays")]
    pub retry_delays_seconds: Vec<u64>,
    /// Drop entities that a new snapshot no longer lists
    #[serde(default)]
    pub prune_missing: bool,
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_retry_delays() -> Vec<u64> {
    vec![2, 5, 10]
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_refresh_interval(),
            retry_delays_seconds: default_retry_delays(),
            prune_missing: false,
        }
    }
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// How often to log a metrics snapshot (seconds)
    #[serde(default = "default_report_interval")]
    pub report_interval_seconds: u64,
}

fn default_report_interval() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_seconds: default_report_interval(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<HerdConfig> {
    use anyhow::Context;

    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: HerdConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = HerdConfig::default();
        assert_eq!(config.window.capacity, 20);
        assert_eq!(config.refresh.interval_seconds, 30);
        assert_eq!(config.refresh.retry_delays_seconds, vec![2, 5, 10]);
        assert!(!config.refresh.prune_missing);
        assert_eq!(config.push.topic, "lora.data");
        assert!(config.push.auto_reconnect);
        assert_eq!(config.metrics.report_interval_seconds, 60);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [api]
            base_url = "http://farm.local:5000"
            request_timeout_seconds = 3

            [push]
            url = "nats://broker.local:4222"
            topic = "barn.sensors"
            auto_reconnect = false
            reconnect_delays_seconds = [1]
            max_reconnect_attempts = 4

            [window]
            capacity = 50

            [refresh]
            interval_seconds = 0
            prune_missing = true

            [metrics]
            report_interval_seconds = 15
        "#;

        let config: HerdConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.api.base_url, "http://farm.local:5000");
        assert_eq!(config.api.request_timeout_seconds, 3);
        assert_eq!(config.push.url, "nats://broker.local:4222");
        assert_eq!(config.push.topic, "barn.sensors");
        assert!(!config.push.auto_reconnect);
        assert_eq!(config.push.max_reconnect_attempts, 4);
        assert_eq!(config.window.capacity, 50);
        assert_eq!(config.refresh.interval_seconds, 0);
        assert!(config.refresh.prune_missing);
        assert_eq!(config.metrics.report_interval_seconds, 15);
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [window]
            capacity = 5
        "#;

        let config: HerdConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.window.capacity, 5);
        assert_eq!(config.refresh.interval_seconds, 30); // Default
        assert_eq!(config.push.connect_timeout_seconds, 10); // Default
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[refresh]\nretry_delays_seconds = [1, 1]").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.refresh.retry_delays_seconds, vec![1, 1]);
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(dir.path().join("absent.toml")).is_err());
    }
}
