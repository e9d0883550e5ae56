//! Configuration management for the station manager

use crate::{CsmsError, CsmsResult};
use ocpp_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strategy names the built-in registry knows how to build
pub const KNOWN_STRATEGIES: &[&str] = &["proportional"];

/// Station manager configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// OCPP protocol configuration
    pub ocpp: OcppConfig,
    /// Smart charging scheduler configuration
    pub smart_charging: SmartChargingConfig,
    /// Authorization configuration
    pub auth: AuthConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// OCPP protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcppConfig {
    /// How long a command waits for the station's answer
    pub command_timeout_secs: u64,
    /// Heartbeat interval in seconds
    pub heartbeat_interval_secs: u64,
}

impl Default for OcppConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 30,
            heartbeat_interval_secs: 60,
        }
    }
}

impl OcppConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Transport settings for channels opened by stations
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            request_timeout: self.command_timeout(),
            ..Default::default()
        }
    }
}

/// Smart charging scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartChargingConfig {
    /// Quiet period coalescing successive site area edits
    pub debounce_ms: u64,
    /// Lifetime of a site area lock
    pub lock_ttl_secs: u64,
    /// How long a recompute waits for the lock before giving up (0 = single attempt)
    pub lock_acquire_timeout_ms: u64,
    /// Delay between two acquire attempts
    pub lock_poll_interval_ms: u64,
    /// Stack level of the transaction profiles pushed by the scheduler
    pub profile_stack_level: i32,
    /// Strategy used for tenants without an explicit one
    pub default_strategy: String,
}

impl Default for SmartChargingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            lock_ttl_secs: 180,
            lock_acquire_timeout_ms: 500,
            lock_poll_interval_ms: 50,
            profile_stack_level: 2,
            default_strategy: "proportional".to_string(),
        }
    }
}

impl SmartChargingConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquire_timeout_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

/// Authorization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// When disabled every tag is accepted
    pub enabled: bool,
    /// Tags accepted by the built-in tag list authorizer
    pub accepted_tags: Vec<String>,
    /// Whether admins may stop transactions they do not own
    pub admin_override: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            accepted_tags: Vec::new(),
            admin_override: true,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics
    pub enabled: bool,
    /// Metrics namespace
    pub namespace: String,
    /// Histogram buckets for command latency
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "ocpp_station_manager".to_string(),
            latency_buckets: vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        }
    }
}

/// Configuration builder for easier setup
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    pub fn ocpp(mut self, ocpp: OcppConfig) -> Self {
        self.config.ocpp = ocpp;
        self
    }

    pub fn smart_charging(mut self, smart_charging: SmartChargingConfig) -> Self {
        self.config.smart_charging = smart_charging;
        self
    }

    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.config.auth = auth;
        self
    }

    pub fn metrics(mut self, metrics: MetricsConfig) -> Self {
        self.config.metrics = metrics;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Load configuration from a TOML file, then apply environment overrides
pub fn load_from_file(path: &str) -> CsmsResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| CsmsError::Configuration {
        message: format!("cannot read {}: {}", path, e),
    })?;
    let mut config: Config = toml::from_str(&content).map_err(|e| CsmsError::Configuration {
        message: format!("invalid {}: {}", path, e),
    })?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Default configuration with environment overrides applied
pub fn load_from_env() -> Config {
    let mut config = Config::default();
    apply_env_overrides(&mut config);
    config
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(level) = std::env::var("STATION_MANAGER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(timeout) = std::env::var("STATION_MANAGER_COMMAND_TIMEOUT") {
        if let Ok(timeout) = timeout.parse() {
            config.ocpp.command_timeout_secs = timeout;
        }
    }
    if let Ok(debounce) = std::env::var("STATION_MANAGER_DEBOUNCE_MS") {
        if let Ok(debounce) = debounce.parse() {
            config.smart_charging.debounce_ms = debounce;
        }
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<(), String> {
    if config.ocpp.command_timeout_secs == 0 {
        return Err("Command timeout cannot be 0".to_string());
    }

    let smart = &config.smart_charging;
    if smart.lock_ttl_secs == 0 {
        return Err("Lock TTL cannot be 0".to_string());
    }
    if smart.lock_acquire_timeout_ms > 0 && smart.lock_poll_interval_ms > smart.lock_acquire_timeout_ms
    {
        return Err("Lock poll interval cannot exceed the acquire timeout".to_string());
    }
    if !KNOWN_STRATEGIES.contains(&smart.default_strategy.as_str()) {
        return Err(format!(
            "Unknown smart charging strategy: {}",
            smart.default_strategy
        ));
    }

    if config.metrics.enabled && config.metrics.namespace.is_empty() {
        return Err("Metrics namespace cannot be empty".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ocpp.command_timeout_secs, 30);
        assert_eq!(config.smart_charging.lock_ttl_secs, 180);
        assert_eq!(config.smart_charging.default_strategy, "proportional");
        assert!(config.auth.enabled);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .smart_charging(SmartChargingConfig {
                debounce_ms: 10,
                ..Default::default()
            })
            .build();

        assert_eq!(config.smart_charging.debounce(), Duration::from_millis(10));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.ocpp.command_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.smart_charging.lock_ttl_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.smart_charging.lock_poll_interval_ms = 1000;
        assert!(validate_config(&config).is_err());

        // A single attempt ignores the poll interval
        config.smart_charging.lock_acquire_timeout_ms = 0;
        assert!(validate_config(&config).is_ok());

        let mut config = Config::default();
        config.smart_charging.default_strategy = "greedy".to_string();
        assert!(validate_config(&config).unwrap_err().contains("greedy"));

        let mut config = Config::default();
        config.metrics.namespace.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_from_file_with_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[logging]
format = "json"

[smart_charging]
lock_ttl_secs = 60
profile_stack_level = 3

[auth]
accepted_tags = ["TAG-1", "TAG-2"]
"#
        )
        .unwrap();

        let config = load_from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.smart_charging.lock_ttl_secs, 60);
        assert_eq!(config.smart_charging.profile_stack_level, 3);
        assert_eq!(config.smart_charging.lock_poll_interval_ms, 50);
        assert_eq!(config.auth.accepted_tags.len(), 2);
        assert_eq!(config.ocpp.heartbeat_interval_secs, 60);
    }

    #[test]
    fn test_load_from_file_errors() {
        let err = load_from_file("/nonexistent/station-manager.toml").unwrap_err();
        assert!(matches!(err, CsmsError::Configuration { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ocpp\ncommand_timeout_secs = ").unwrap();
        assert!(load_from_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_load_from_env() {
        std::env::set_var("STATION_MANAGER_DEBOUNCE_MS", "750");
        std::env::set_var("STATION_MANAGER_COMMAND_TIMEOUT", "not-a-number");
        let config = load_from_env();
        assert_eq!(config.smart_charging.debounce_ms, 750);
        assert_eq!(config.ocpp.command_timeout_secs, 30);
        std::env::remove_var("STATION_MANAGER_DEBOUNCE_MS");
        std::env::remove_var("STATION_MANAGER_COMMAND_TIMEOUT");
    }
}
