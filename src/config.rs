//! Service configuration
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | METRIC_AGG_CONFIG | - | Path of a TOML config file |
//! | METRIC_AGG_STORE | memory | Store backend (`memory` / `journal`) |
//! | METRIC_AGG_JOURNAL_PATH | metrics.journal | Journal file |
//! | METRIC_AGG_SYNC | true | fsync every journal append |
//! | METRIC_AGG_PARTITIONS | 4 | Transport partitions / workers |
//! | METRIC_AGG_REDELIVERY_MS | 500 | Delay before redelivering a no-ack |
//! | METRIC_AGG_MAX_REDELIVERIES | 10 | Redeliveries before dead-lettering |
//! | METRIC_AGG_INCREMENT | atomic | Increment strategy (`atomic` / `optimistic`) |
//! | METRIC_AGG_LOG_LEVEL | info | Default log filter when RUST_LOG is unset |
//! | METRIC_AGG_LOG_JSON | false | JSON log lines |

use crate::metrics::IncrementStrategy;
use crate::transport::WorkerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "METRIC_AGG_CONFIG";

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "Invalid config file: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Journal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub journal_path: PathBuf,
    pub sync_every_write: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::Memory,
            journal_path: PathBuf::from("metrics.journal"),
            sync_every_write: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub partitions: usize,
    pub redelivery_delay_ms: u64,
    pub max_redeliveries: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            partitions: 4,
            redelivery_delay_ms: 500,
            max_redeliveries: 10,
        }
    }
}

impl ConsumerConfig {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            redelivery_delay: Duration::from_millis(self.redelivery_delay_ms),
            max_redeliveries: self.max_redeliveries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncrementMode {
    #[default]
    Atomic,
    Optimistic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub increment_strategy: IncrementMode,
    /// Compare-and-swap attempts for the optimistic strategy
    pub max_attempts: u32,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            increment_strategy: IncrementMode::Atomic,
            max_attempts: 5,
        }
    }
}

impl AggregationConfig {
    pub fn strategy(&self) -> IncrementStrategy {
        match self.increment_strategy {
            IncrementMode::Atomic => IncrementStrategy::Atomic,
            IncrementMode::Optimistic => IncrementStrategy::Optimistic {
                max_attempts: self.max_attempts,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub store: StoreConfig,
    pub consumer: ConsumerConfig,
    pub aggregator: AggregationConfig,
    pub logging: LoggingConfig,
}

impl AggregatorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Parse)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// File named by `METRIC_AGG_CONFIG` (if any), then environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment)
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("METRIC_AGG_STORE") {
            self.store.backend = match v.trim().to_ascii_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "journal" => StoreBackend::Journal,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "METRIC_AGG_STORE must be memory or journal, got {:?}",
                        other
                    )))
                }
            };
        }
        if let Some(v) = lookup("METRIC_AGG_JOURNAL_PATH") {
            self.store.journal_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("METRIC_AGG_SYNC") {
            self.store.sync_every_write = parse_bool("METRIC_AGG_SYNC", &v)?;
        }
        if let Some(v) = lookup("METRIC_AGG_PARTITIONS") {
            self.consumer.partitions = parse_num("METRIC_AGG_PARTITIONS", &v)?;
        }
        if let Some(v) = lookup("METRIC_AGG_REDELIVERY_MS") {
            self.consumer.redelivery_delay_ms = parse_num("METRIC_AGG_REDELIVERY_MS", &v)?;
        }
        if let Some(v) = lookup("METRIC_AGG_MAX_REDELIVERIES") {
            self.consumer.max_redeliveries = parse_num("METRIC_AGG_MAX_REDELIVERIES", &v)?;
        }
        if let Some(v) = lookup("METRIC_AGG_INCREMENT") {
            self.aggregator.increment_strategy = match v.trim().to_ascii_lowercase().as_str() {
                "atomic" => IncrementMode::Atomic,
                "optimistic" => IncrementMode::Optimistic,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "METRIC_AGG_INCREMENT must be atomic or optimistic, got {:?}",
                        other
                    )))
                }
            };
        }
        if let Some(v) = lookup("METRIC_AGG_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("METRIC_AGG_LOG_JSON") {
            self.logging.json = parse_bool("METRIC_AGG_LOG_JSON", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer.partitions == 0 {
            return Err(ConfigError::Invalid(
                "consumer.partitions must be at least 1".to_string(),
            ));
        }
        if self.aggregator.increment_strategy == IncrementMode::Optimistic
            && self.aggregator.max_attempts == 0
        {
            return Err(ConfigError::Invalid(
                "aggregator.max_attempts must be at least 1 for the optimistic strategy".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::Journal
            && self.store.journal_path.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid(
                "store.journal_path is required for the journal backend".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid(format!(
            "{} must be a boolean, got {:?}",
            key, value
        ))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} must be a number, got {:?}", key, value)))
}
