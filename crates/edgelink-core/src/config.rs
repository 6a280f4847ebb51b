/*!
 * Configuration management for EdgeLink.
 *
 * This module provides functionality to load, validate, and access configuration
 * settings for EdgeLink components. Sources are layered: built-in defaults, then
 * an optional file, then environment variables.
 */
use std::path::Path;
use std::sync::Arc;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Core configuration for EdgeLink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Protocol adapter configuration
    #[serde(default)]
    pub adapter: AdapterConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, "edgelink_engine=debug", ...)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to include the event target in log lines
    #[serde(default = "default_true")]
    pub with_target: bool,

    /// Whether to use ANSI colours
    #[serde(default = "default_true")]
    pub ansi: bool,
}

/// Retry backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Growth factor applied per consecutive failure
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Ceiling for the computed delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Relative jitter in `[0, 1)`; `0` disables jitter
    #[serde(default)]
    pub jitter_fraction: f64,
}

/// Protocol adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Reconnection backoff
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Deadline for a single read, in milliseconds (0 means no timeout)
    #[serde(default)]
    pub read_timeout_ms: u64,

    /// Deadline for a single disconnect during stop, in milliseconds (0 means no timeout)
    #[serde(default = "default_disconnect_timeout_ms")]
    pub disconnect_timeout_ms: u64,

    /// Per-subscriber event queue capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Keep emitting DEVICE_OFFLINE placeholders every poll interval while a device waits to reconnect
    #[serde(default)]
    pub emit_offline_during_backoff: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: true,
            ansi: true,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter_fraction: 0.0,
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            read_timeout_ms: 0,
            disconnect_timeout_ms: default_disconnect_timeout_ms(),
            event_capacity: default_event_capacity(),
            emit_offline_during_backoff: false,
        }
    }
}

fn default_app_name() -> String {
    "edgelink".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_disconnect_timeout_ms() -> u64 {
    5_000
}

fn default_event_capacity() -> usize {
    crate::event::DEFAULT_CHANNEL_CAPACITY
}

impl BackoffConfig {
    /// Check the backoff parameters for consistency
    pub fn validate(&self) -> Result<()> {
        if self.initial_delay_ms == 0 {
            return Err(Error::config("backoff.initial_delay_ms must be positive"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::config(format!(
                "backoff.multiplier must be >= 1, got {}",
                self.multiplier
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(Error::config(format!(
                "backoff.max_delay_ms ({}) is below backoff.initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        if !(0.0..1.0).contains(&self.jitter_fraction) {
            return Err(Error::config(format!(
                "backoff.jitter_fraction must be in [0, 1), got {}",
                self.jitter_fraction
            )));
        }
        Ok(())
    }
}

impl AdapterConfig {
    /// Check the adapter settings for consistency
    pub fn validate(&self) -> Result<()> {
        self.backoff.validate()?;
        if self.event_capacity == 0 {
            return Err(Error::config("adapter.event_capacity must be positive"));
        }
        Ok(())
    }
}

impl Config {
    /// Check every section for consistency
    pub fn validate(&self) -> Result<()> {
        self.adapter.validate()
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    override_with: Option<Config>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Override with an existing config
    pub fn override_with(mut self, config: Config) -> Self {
        self.override_with = Some(config);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        if let Some(config) = self.override_with {
            config.validate()?;
            return Ok(config);
        }

        let default_config = Config::default();
        let mut config_builder = ConfigLib::builder().add_source(
            ConfigLib::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: Config = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.app_name, "edgelink");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.adapter.backoff.initial_delay_ms, 1000);
        assert_eq!(config.adapter.backoff.multiplier, 2.0);
        assert_eq!(config.adapter.backoff.max_delay_ms, 60000);
        assert_eq!(config.adapter.backoff.jitter_fraction, 0.0);
        assert_eq!(config.adapter.read_timeout_ms, 0);
        assert!(!config.adapter.emit_offline_during_backoff);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.general.app_name, "edgelink");
        assert_eq!(config.adapter.event_capacity, 1024);
    }

    #[test]
    fn test_config_builder_with_file() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("edgelink.toml");

        {
            let mut file = File::create(&file_path)?;
            file.write_all(
                br#"
                [general]
                app_name = "line-3"

                [logging]
                level = "debug"

                [adapter]
                read_timeout_ms = 750

                [adapter.backoff]
                initial_delay_ms = 500
                multiplier = 3.0
                max_delay_ms = 10000
                jitter_fraction = 0.2
            "#,
            )?;
        }

        let config = ConfigBuilder::new().with_config_file(file_path).build()?;

        assert_eq!(config.general.app_name, "line-3");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.adapter.read_timeout_ms, 750);
        assert_eq!(config.adapter.backoff.initial_delay_ms, 500);
        assert_eq!(config.adapter.backoff.multiplier, 3.0);
        assert_eq!(config.adapter.backoff.max_delay_ms, 10000);
        assert_eq!(config.adapter.backoff.jitter_fraction, 0.2);
        assert_eq!(config.adapter.disconnect_timeout_ms, 5000);

        Ok(())
    }

    #[test]
    fn test_config_builder_with_env() -> Result<()> {
        env::set_var("EDGELINKTEST__GENERAL__APP_NAME", "env-app");
        env::set_var("EDGELINKTEST__ADAPTER__BACKOFF__MAX_DELAY_MS", "30000");

        let config = ConfigBuilder::new()
            .with_environment_prefix("edgelinktest")
            .build()?;

        assert_eq!(config.general.app_name, "env-app");
        assert_eq!(config.adapter.backoff.max_delay_ms, 30000);

        env::remove_var("EDGELINKTEST__GENERAL__APP_NAME");
        env::remove_var("EDGELINKTEST__ADAPTER__BACKOFF__MAX_DELAY_MS");

        Ok(())
    }

    #[test]
    fn test_backoff_validation() {
        let mut backoff = BackoffConfig::default();
        assert!(backoff.validate().is_ok());

        backoff.multiplier = 0.5;
        assert!(matches!(backoff.validate(), Err(Error::Config(_))));

        backoff = BackoffConfig {
            max_delay_ms: 10,
            ..BackoffConfig::default()
        };
        assert!(backoff.validate().is_err());

        backoff = BackoffConfig {
            jitter_fraction: 1.0,
            ..BackoffConfig::default()
        };
        assert!(backoff.validate().is_err());

        backoff = BackoffConfig {
            initial_delay_ms: 0,
            ..BackoffConfig::default()
        };
        assert!(backoff.validate().is_err());
    }

    #[test]
    fn test_override_is_validated() {
        let mut config = Config::default();
        config.adapter.event_capacity = 0;
        assert!(ConfigBuilder::new().override_with(config).build().is_err());
    }

    #[test]
    fn test_toml_round_trip_of_defaults() -> Result<()> {
        let rendered = Config::default().to_toml_string()?;
        let parsed: Config = toml::from_str(&rendered)?;
        assert_eq!(parsed.adapter.backoff, BackoffConfig::default());
        Ok(())
    }

    #[test]
    fn test_shared_config() {
        let shared = SharedConfig::new(Config::default());
        let shared2 = shared.clone();
        assert_eq!(shared2.get().general.app_name, "edgelink");
    }
}
