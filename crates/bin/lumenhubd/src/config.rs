//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `lumenhub.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the device map and hub document live.
    pub hub: HubConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// External flag polling.
    pub flags: FlagsConfig,
    /// In-process broadcast channel.
    pub broadcast: BroadcastConfig,
    /// Transport toggles.
    pub integrations: IntegrationsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// JSON array of device records.
    pub devices: PathBuf,
    /// JSON hub document. Optional on disk.
    pub document: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FlagsConfig {
    /// Overrides `defaults.flagPollIntervalSecs` of the hub document.
    pub poll_interval_secs: Option<u64>,
    /// Timeout of one flag request.
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Updates buffered per subscriber before it lags.
    pub capacity: usize,
}

/// Per-transport toggles.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    /// Simulate every `virtual` device of the device map.
    pub virtual_enabled: bool,
}

impl Config {
    /// Load configuration from `lumenhub.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if a
    /// value fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("lumenhub.toml")?;
        config.apply_env_overrides()?;
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

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(val) = var("LUMENHUB_DEVICES") {
            self.hub.devices = PathBuf::from(val);
        }
        if let Some(val) = var("LUMENHUB_DOCUMENT") {
            self.hub.document = PathBuf::from(val);
        }
        if let Some(val) = var("LUMENHUB_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("LUMENHUB_FLAG_POLL_SECS") {
            let secs = val.parse().map_err(|_| {
                ConfigError::Validation(format!("LUMENHUB_FLAG_POLL_SECS is not a number: {val}"))
            })?;
            self.flags.poll_interval_secs = Some(secs);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.flags.poll_interval_secs == Some(0) {
            return Err(ConfigError::Validation(
                "flag poll interval must be non-zero".to_string(),
            ));
        }
        if self.flags.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "flag request timeout must be non-zero".to_string(),
            ));
        }
        if self.broadcast.capacity == 0 {
            return Err(ConfigError::Validation(
                "broadcast capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn flag_timeout(&self) -> Duration {
        Duration::from_secs(self.flags.timeout_secs)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            devices: PathBuf::from("devices.json"),
            document: PathBuf::from("hub.json"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "lumenhubd=info,lumenhub_app=info,lumenhub_adapter_virtual=info,lumenhub_adapter_config_file=info,lumenhub_adapter_flags_http=info".to_string(),
        }
    }
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: None,
            timeout_secs: 10,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            virtual_enabled: true,
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
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.hub.devices, PathBuf::from("devices.json"));
        assert_eq!(config.hub.document, PathBuf::from("hub.json"));
        assert_eq!(config.flags.poll_interval_secs, None);
        assert_eq!(config.flag_timeout(), Duration::from_secs(10));
        assert_eq!(config.broadcast.capacity, 256);
        assert!(config.integrations.virtual_enabled);
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.broadcast.capacity, 256);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [hub]
            devices = '/etc/lumenhub/devices.json'
            document = '/etc/lumenhub/hub.json'

            [logging]
            filter = 'debug'

            [flags]
            poll_interval_secs = 15
            timeout_secs = 3

            [broadcast]
            capacity = 32

            [integrations]
            virtual_enabled = false
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.hub.devices, PathBuf::from("/etc/lumenhub/devices.json"));
        assert_eq!(config.hub.document, PathBuf::from("/etc/lumenhub/hub.json"));
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.flags.poll_interval_secs, Some(15));
        assert_eq!(config.flag_timeout(), Duration::from_secs(3));
        assert_eq!(config.broadcast.capacity, 32);
        assert!(!config.integrations.virtual_enabled);
    }

    #[test]
    fn should_parse_partial_toml_with_defaults() {
        let config: Config = toml::from_str("[flags]\npoll_interval_secs = 5").unwrap();
        assert_eq!(config.flags.poll_interval_secs, Some(5));
        assert_eq!(config.flags.timeout_secs, 10);
        assert_eq!(config.hub.devices, PathBuf::from("devices.json"));
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.broadcast.capacity, 256);
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }

    #[test]
    fn should_apply_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("LUMENHUB_DEVICES", "/srv/devices.json"),
                ("LUMENHUB_DOCUMENT", "/srv/hub.json"),
                ("LUMENHUB_LOG", "warn"),
                ("LUMENHUB_FLAG_POLL_SECS", "45"),
            ]))
            .unwrap();
        assert_eq!(config.hub.devices, PathBuf::from("/srv/devices.json"));
        assert_eq!(config.hub.document, PathBuf::from("/srv/hub.json"));
        assert_eq!(config.logging.filter, "warn");
        assert_eq!(config.flags.poll_interval_secs, Some(45));
    }

    #[test]
    fn should_prefer_rust_log_over_lumenhub_log() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[("LUMENHUB_LOG", "warn"), ("RUST_LOG", "trace")]))
            .unwrap();
        assert_eq!(config.logging.filter, "trace");
    }

    #[test]
    fn should_reject_non_numeric_flag_interval() {
        let mut config = Config::default();
        let result = config.apply_overrides(env(&[("LUMENHUB_FLAG_POLL_SECS", "soon")]));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_reject_zero_intervals() {
        let mut config = Config::default();
        config.flags.poll_interval_secs = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.flags.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.broadcast.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_accept_defaults() {
        assert!(Config::default().validate().is_ok());
    }
}
