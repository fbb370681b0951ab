//! Logging setup
//!
//! Installs a `tracing-subscriber` fmt subscriber writing to stderr. `RUST_LOG`
//! takes precedence over the configured level.

pub use crate::config::LoggingConfig;

use tracing_subscriber::EnvFilter;

#[derive(Debug)]
pub enum ObservabilityError {
    Filter(String),
    AlreadyInstalled(String),
}

impl std::fmt::Display for ObservabilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObservabilityError::Filter(msg) => write!(f, "Invalid log filter: {}", msg),
            ObservabilityError::AlreadyInstalled(msg) => {
                write!(f, "Tracing subscriber already installed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ObservabilityError {}

/// Filter from `RUST_LOG` when set, else from `config.level`
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ObservabilityError> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(&config.level),
    };
    filter.map_err(|e| ObservabilityError::Filter(e.to_string()))
}

pub fn init_tracing(config: &LoggingConfig) -> Result<(), ObservabilityError> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ObservabilityError::AlreadyInstalled(e.to_string()))
}
