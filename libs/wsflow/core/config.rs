use crate::auth::Credentials;
use crate::connection::ConnectionParams;
use crate::error::WsError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for WsError {
    fn from(error: ConfigError) -> Self {
        WsError::Configuration(error.to_string())
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Token bucket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub capacity: u64,
    /// Tokens added per `refill_interval_ms`
    pub refill_rate: u64,
    pub refill_interval_ms: u64,
    /// Maximum queued requests; 0 rejects as soon as the bucket is empty
    pub queue_limit: usize,
    /// Category → token cost; unknown categories cost 1
    pub cost_map: HashMap<String, u64>,
    /// Release queued requests by priority instead of FIFO
    pub priority_queue: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            refill_rate: 10,
            refill_interval_ms: 1000,
            queue_limit: 100,
            cost_map: HashMap::new(),
            priority_queue: false,
        }
    }
}

/// Options for one connection
///
/// Every field has a default, so a YAML file only needs the values it
/// changes. `host`, `port`, `path` and `tls` override the adapter's
/// connection parameters when set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub tls: Option<bool>,
    /// Connect, auth and default request timeout
    pub timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Backoff randomisation as a fraction, 0.25 = ±25%
    pub jitter: f64,
    /// `false` abandons the connection on the first disconnect
    pub reconnect: bool,
    pub auth_refresh_threshold_s: i64,
    pub subscription_timeout_s: u64,
    pub housekeeping_interval_ms: u64,
    pub heartbeat_interval_ms: Option<u64>,
    pub rate_limit: RateLimitConfig,
    pub credentials: Option<Credentials>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            path: None,
            tls: None,
            timeout_ms: 10_000,
            max_reconnect_attempts: 5,
            base_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            jitter: 0.25,
            reconnect: true,
            auth_refresh_threshold_s: 60,
            subscription_timeout_s: 30,
            housekeeping_interval_ms: 1000,
            heartbeat_interval_ms: None,
            rate_limit: RateLimitConfig::default(),
            credentials: None,
        }
    }
}

impl ConnectionOptions {
    /// Parse options from a YAML document and validate them
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let options: ConnectionOptions = serde_yaml::from_str(yaml)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a YAML file
    pub fn load(config_path: impl AsRef<Path>) -> ConfigResult<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        Self::from_yaml_str(&yaml_content)
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::ValidationError(
                "base_backoff_ms must not exceed max_backoff_ms".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::ValidationError(
                "jitter must be between 0 and 1".to_string(),
            ));
        }
        if self.auth_refresh_threshold_s < 0 {
            return Err(ConfigError::ValidationError(
                "auth_refresh_threshold_s must not be negative".to_string(),
            ));
        }
        if self.housekeeping_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "housekeeping_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "heartbeat_interval_ms must be greater than 0".to_string(),
            ));
        }

        let limits = &self.rate_limit;
        if limits.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.capacity must be at least 1".to_string(),
            ));
        }
        if limits.refill_rate == 0 || limits.refill_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.refill_rate and refill_interval_ms must be greater than 0".to_string(),
            ));
        }
        if let Some((category, cost)) = limits.cost_map.iter().find(|(_, cost)| **cost > limits.capacity) {
            return Err(ConfigError::ValidationError(format!(
                "rate_limit.cost_map[{}] = {} exceeds capacity {}",
                category, cost, limits.capacity
            )));
        }

        Ok(())
    }

    /// Apply host/port/path/tls overrides and the connect timeout
    pub fn connection_params(&self, mut params: ConnectionParams) -> ConnectionParams {
        if let Some(host) = &self.host {
            params.host = host.clone();
        }
        if let Some(port) = self.port {
            params.port = port;
        }
        if let Some(path) = &self.path {
            params.path = path.clone();
        }
        if let Some(tls) = self.tls {
            params.tls = tls;
        }
        params.connect_timeout = self.timeout();
        params
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_millis(self.housekeeping_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_ms.map(Duration::from_millis)
    }

    /// Log configuration summary
    pub fn log(&self) {
        info!("Connection options:");
        info!("  Endpoint override: {:?}:{:?}{:?}", self.host, self.port, self.path);
        info!("  Timeout: {} ms", self.timeout_ms);
        info!(
            "  Reconnect: {} (max {} attempts, backoff {}..{} ms, jitter {})",
            self.reconnect, self.max_reconnect_attempts, self.base_backoff_ms, self.max_backoff_ms, self.jitter
        );
        info!(
            "  Rate limit: capacity {}, {} per {} ms, queue {}",
            self.rate_limit.capacity,
            self.rate_limit.refill_rate,
            self.rate_limit.refill_interval_ms,
            self.rate_limit.queue_limit
        );
        info!("  Credentials: {}", if self.credentials.is_some() { "set" } else { "none" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::default();
        assert_eq!(options.timeout_ms, 10_000);
        assert_eq!(options.max_reconnect_attempts, 5);
        assert_eq!(options.base_backoff_ms, 1000);
        assert_eq!(options.max_backoff_ms, 30_000);
        assert_eq!(options.auth_refresh_threshold_s, 60);
        assert_eq!(options.subscription_timeout_s, 30);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
host: test.deribit.com
max_reconnect_attempts: 3
rate_limit:
  capacity: 20
  cost_map:
    matching_engine: 5
credentials:
  client_id: abc
  client_secret: def
"#;
        let options = ConnectionOptions::from_yaml_str(yaml).unwrap();
        assert_eq!(options.host.as_deref(), Some("test.deribit.com"));
        assert_eq!(options.max_reconnect_attempts, 3);
        assert_eq!(options.timeout_ms, 10_000);
        assert_eq!(options.rate_limit.capacity, 20);
        assert_eq!(options.rate_limit.refill_rate, 10);
        assert_eq!(options.rate_limit.cost_map.get("matching_engine"), Some(&5));
        let creds = options.credentials.unwrap();
        assert_eq!(creds.get("client_id"), Some("abc"));
    }

    #[test]
    fn test_validation_errors() {
        let err = ConnectionOptions::from_yaml_str("rate_limit:\n  capacity: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = ConnectionOptions::from_yaml_str("base_backoff_ms: 5000\nmax_backoff_ms: 100\n").unwrap_err();
        assert!(err.to_string().contains("base_backoff_ms"));

        let err = ConnectionOptions::from_yaml_str("timeout_ms: [1, 2]").unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(_)));

        let ws: WsError = ConfigError::ValidationError("bad".into()).into();
        assert!(matches!(ws, WsError::Configuration(_)));
    }

    #[test]
    fn test_connection_params_overrides() {
        let options = ConnectionOptions {
            host: Some("127.0.0.1".into()),
            port: Some(9001),
            tls: Some(false),
            timeout_ms: 2500,
            ..ConnectionOptions::default()
        };
        let params = options.connection_params(ConnectionParams::new("www.deribit.com", 443, "/ws/api/v2", true));
        assert_eq!(params.url(), "ws://127.0.0.1:9001/ws/api/v2");
        assert_eq!(params.connect_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_reconnect_attempts: 3\nrate_limit:\n  capacity: 5\n  refill_rate: 5").unwrap();

        let options = ConnectionOptions::load(file.path()).unwrap();
        assert_eq!(options.max_reconnect_attempts, 3);
        assert_eq!(options.rate_limit.capacity, 5);
        assert_eq!(options.rate_limit.refill_interval_ms, 1000);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConnectionOptions::load(dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(ConfigError::FileError(_))));
    }
}
