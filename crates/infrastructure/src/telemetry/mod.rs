//! Log output setup
//!
//! Installs a `tracing` subscriber with an env-filter and either a
//! human-readable or a JSON formatter. `RUST_LOG` takes precedence over the
//! configured filter.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-field console output
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter directive, e.g. "info" or "application=debug,infrastructure=info"
    pub log_filter: String,
    /// Output format
    pub format: LogFormat,
    /// Include the event target in each line
    pub with_target: bool,
    /// Include the thread id in each line
    pub with_thread_ids: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            format: LogFormat::Pretty,
            with_target: true,
            with_thread_ids: false,
        }
    }
}

/// Subscriber installation failure
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directive does not parse
    #[error("invalid log filter: {0}")]
    Filter(String),

    /// A global subscriber is already installed
    #[error("failed to initialize telemetry: {0}")]
    Init(String),
}

fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(&config.log_filter).map_err(|e| TelemetryError::Filter(e.to_string()))
    })
}

/// Install the global subscriber
///
/// # Example
///
/// ```ignore
/// use infrastructure::telemetry::{TelemetryConfig, init_telemetry};
///
/// init_telemetry(&TelemetryConfig::default())?;
/// ```
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config)?;

    let fmt_layer = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(config.with_target)
            .with_thread_ids(config.with_thread_ids)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_thread_ids(config.with_thread_ids)
            .with_current_span(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    info!(format = ?config.format, "Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn format_deserializes_lowercase() {
        let config: TelemetryConfig = toml::from_str(r#"format = "json""#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn configured_filter_parses() {
        let config = TelemetryConfig {
            log_filter: "application=debug,infrastructure=info".to_string(),
            ..TelemetryConfig::default()
        };
        assert!(EnvFilter::try_new(&config.log_filter).is_ok());
    }

    #[test]
    fn second_init_fails() {
        let config = TelemetryConfig::default();
        let _ = init_telemetry(&config);
        assert!(matches!(init_telemetry(&config), Err(TelemetryError::Init(_))));
    }
}
