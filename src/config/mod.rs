//! Application configuration.
//!
//! Aggregates the route source, publishing and Kafka settings into a single
//! Config struct that can be loaded from YAML files or environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::bus::{BusError, KafkaConfig};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "truckfeed.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "TRUCKFEED_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "TRUCKFEED";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "TRUCKFEED_LOG";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<BusError> for ConfigError {
    fn from(e: BusError) -> Self {
        ConfigError::Invalid(e.to_string())
    }
}

/// Where the route comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// GeoJSON file holding the route.
    pub path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("bislett_to_ekeberg.geojson"),
        }
    }
}

/// Pacing and delivery settings for a publishing run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Topic receiving location events.
    pub topic: String,
    /// Pause between two location events. Zero disables pacing.
    pub interval_ms: u64,
    /// Bound on the final drain.
    pub flush_timeout_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            topic: "truck-location".to_string(),
            interval_ms: 1000,
            flush_timeout_secs: 30,
        }
    }
}

impl PublishConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }
}

/// Values supplied on the command line; they win over every other source.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub input: Option<PathBuf>,
    pub topic: Option<String>,
    pub interval_ms: Option<u64>,
    pub bootstrap_servers: Option<String>,
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub publish: PublishConfig,
    pub kafka: KafkaConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `truckfeed.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// `load` for a path given on the command line.
    ///
    /// The config crate only takes UTF-8 file names, so any other path is an
    /// error rather than silently falling back to the defaults.
    pub fn load_path(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(|p| {
                p.to_str().ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "config path is not valid UTF-8: {}",
                        p.display()
                    ))
                })
            })
            .transpose()?;
        Self::load(path)
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(input) = overrides.input {
            self.source.path = input;
        }
        if let Some(topic) = overrides.topic {
            self.publish.topic = topic;
        }
        if let Some(interval_ms) = overrides.interval_ms {
            self.publish.interval_ms = interval_ms;
        }
        if let Some(bootstrap_servers) = overrides.bootstrap_servers {
            self.kafka.bootstrap_servers = bootstrap_servers;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.publish.topic.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "publish.topic must not be empty".to_string(),
            ));
        }
        if self.publish.flush_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "publish.flush_timeout_secs must be greater than zero".to_string(),
            ));
        }
        self.kafka.validate()?;
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
