//! Logging Setup
//!
//! Installs a global `tracing` subscriber. `RUST_LOG` takes precedence over
//! the configured level; JSON output is meant for log shippers.

use crate::bloomshipper::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Error returned when the subscriber cannot be installed
pub type InitError = Box<dyn std::error::Error + Send + Sync>;

/// Install the global subscriber. Fails if one is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), InitError> {
    let filter = env_filter(config)?;

    if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    }
}

fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, InitError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(&config.level)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        let config = LoggingConfig {
            level: "bloom=notalevel".to_string(),
            json: false,
        };
        if std::env::var("RUST_LOG").is_err() {
            assert!(env_filter(&config).is_err());
        }
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
