//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `efbridge.toml` in the working directory. Every field has a
//! default so the file is optional, but the cloud keys must come from
//! somewhere. Environment variables take precedence over file values.

use std::time::Duration;

use serde::Deserialize;

use efbridge_adapter_cloud_http::CloudConfig;
use efbridge_adapter_mqtt::MqttConfig;
use efbridge_app::services::bridge::BridgeConfig;
use efbridge_app::services::device_runtime::RuntimeConfig;
use efbridge_domain::device::DeviceSn;
use efbridge_domain::liveness::{self, DEFAULT_OFFLINE_WINDOW_SECS, LivenessThresholds};
use efbridge_domain::store::StoreConfig;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cloud API credentials and endpoint.
    pub cloud: CloudConfig,
    /// Poll cadence, liveness window and store sizing.
    pub polling: PollingConfig,
    /// MQTT client tuning.
    pub mqtt: MqttConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Poll loop and per-device store settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Requested seconds between poll cycles; never less than 30.
    pub refresh_period_secs: u64,
    /// Seconds without data before a device is considered offline.
    pub offline_window_secs: u64,
    /// Bounded history size per message class.
    pub history_capacity: usize,
    /// Keep raw data messages in a history for diagnostics.
    pub collect_raw: bool,
    /// Serials to bridge; empty bridges every device on the account.
    pub devices: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Config {
    /// Load configuration from `efbridge.toml` (if present), apply
    /// environment-variable overrides, then validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("efbridge.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("EFBRIDGE_ACCESS_KEY") {
            self.cloud.access_key = val;
        }
        if let Ok(val) = std::env::var("EFBRIDGE_SECRET_KEY") {
            self.cloud.secret_key = val;
        }
        if let Ok(val) = std::env::var("EFBRIDGE_GROUP") {
            self.cloud.group = val;
        }
        if let Ok(val) = std::env::var("EFBRIDGE_DEVICES") {
            self.polling.devices = parse_device_list(&val);
        }
        if let Ok(val) = std::env::var("EFBRIDGE_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cloud.access_key.is_empty() || self.cloud.secret_key.is_empty() {
            return Err(ConfigError::Validation(
                "cloud access_key and secret_key are required".to_string(),
            ));
        }
        if self.polling.history_capacity < 2 {
            return Err(ConfigError::Validation(
                "history_capacity must be at least 2".to_string(),
            ));
        }
        if self.polling.offline_window_secs == 0 {
            return Err(ConfigError::Validation(
                "offline_window_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective time between poll cycles.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(liveness::effective_interval(self.polling.refresh_period_secs))
    }

    /// Coordinator settings derived from the polling section.
    #[must_use]
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            devices: self
                .polling
                .devices
                .iter()
                .map(|sn| DeviceSn::new(sn.as_str()))
                .collect(),
            runtime: RuntimeConfig {
                store: StoreConfig {
                    history_capacity: self.polling.history_capacity,
                    collect_raw: self.polling.collect_raw,
                },
                thresholds: LivenessThresholds::from_window(
                    self.polling.offline_window_secs,
                    self.polling.refresh_period_secs,
                ),
            },
        }
    }
}

fn parse_device_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|sn| !sn.is_empty())
        .map(str::to_string)
        .collect()
}

impl Default for PollingConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            refresh_period_secs: 60,
            offline_window_secs: DEFAULT_OFFLINE_WINDOW_SECS,
            history_capacity: store.history_capacity,
            collect_raw: store.collect_raw,
            devices: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "efbridged=info,efbridge=info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_keys() -> Config {
        let mut config = Config::default();
        config.cloud.access_key = "ak".to_string();
        config.cloud.secret_key = "sk".to_string();
        config
    }

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.polling.refresh_period_secs, 60);
        assert_eq!(config.polling.offline_window_secs, 120);
        assert_eq!(config.polling.history_capacity, 20);
        assert!(!config.polling.collect_raw);
        assert!(config.polling.devices.is_empty());
        assert_eq!(config.mqtt.keep_alive_secs, 30);
        assert_eq!(config.cloud.group, "default");
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.polling.refresh_period_secs, 60);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [cloud]
            access_key = 'ak'
            secret_key = 'sk'
            group = 'Home Lab'

            [polling]
            refresh_period_secs = 30
            offline_window_secs = 300
            history_capacity = 5
            collect_raw = true
            devices = ['HJ31']

            [mqtt]
            keep_alive_secs = 45

            [logging]
            filter = 'debug'
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cloud.access_key, "ak");
        assert_eq!(config.cloud.group, "Home Lab");
        assert_eq!(config.polling.offline_window_secs, 300);
        assert_eq!(config.polling.history_capacity, 5);
        assert!(config.polling.collect_raw);
        assert_eq!(config.polling.devices, vec!["HJ31".to_string()]);
        assert_eq!(config.mqtt.keep_alive_secs, 45);
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.polling.refresh_period_secs, 60);
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }

    #[test]
    fn should_reject_missing_credentials() {
        assert!(matches!(
            Config::default().validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn should_reject_history_capacity_below_two() {
        let mut config = with_keys();
        config.polling.history_capacity = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_zero_offline_window() {
        let mut config = with_keys();
        config.polling.offline_window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_accept_valid_config() {
        assert!(with_keys().validate().is_ok());
    }

    #[test]
    fn should_clamp_poll_interval_to_thirty_seconds() {
        let mut config = with_keys();
        config.polling.refresh_period_secs = 5;
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
    }

    #[test]
    fn should_derive_offline_threshold_from_window() {
        let mut config = with_keys();
        config.polling.offline_window_secs = 300;
        config.polling.refresh_period_secs = 60;
        assert_eq!(config.bridge_config().runtime.thresholds.offline(), 5);
    }

    #[test]
    fn should_floor_offline_threshold_at_one_cycle() {
        let mut config = with_keys();
        config.polling.offline_window_secs = 10;
        assert_eq!(config.bridge_config().runtime.thresholds.offline(), 1);
    }

    #[test]
    fn should_split_device_list_from_env_value() {
        assert_eq!(
            parse_device_list(" HJ31, R331 ,,"),
            vec!["HJ31".to_string(), "R331".to_string()]
        );
    }
}
