//! Application configuration
//!
//! Split into:
//! - `AppConfig`: process settings layered from defaults, an optional
//!   `chaos.toml` and `CHAOS__*` environment variables
//! - `ExperimentCatalog`: the `[[experiments]]` definitions file

mod catalog;

use std::path::{Path, PathBuf};
use std::time::Duration;

use application::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::notifiers::WebhookConfig;
use crate::probes::SimulationConfig;
use crate::telemetry::TelemetryConfig;

pub use catalog::ExperimentCatalog;

/// Configuration loading failure
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Layered settings could not be read or deserialized
    #[error("settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// A file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A catalog file is not valid TOML for the expected shape
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] toml::de::Error),

    /// A catalog parsed but violates a structural rule
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

/// A webhook bound to a notification channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookChannel {
    /// Channel name alert rules refer to
    pub channel: String,
    /// Endpoint settings
    #[serde(flatten)]
    pub webhook: WebhookConfig,
}

/// Notification hub settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Per-notifier delivery timeout in seconds
    pub delivery_timeout_secs: u64,
    /// Register the tracing log notifier under the `log` channel
    pub log: bool,
    /// Webhook channels
    pub webhooks: Vec<WebhookChannel>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_secs: 5,
            log: true,
            webhooks: Vec::new(),
        }
    }
}

impl NotificationConfig {
    /// Delivery timeout as a duration
    pub const fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    /// Every configured channel name
    pub fn channels(&self) -> Vec<String> {
        let log = self.log.then(|| "log".to_string());
        log.into_iter()
            .chain(self.webhooks.iter().map(|w| w.channel.clone()))
            .collect()
    }
}

/// Top-level process settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Worker pool and monitor sizing
    pub orchestrator: OrchestratorConfig,
    /// Notifier registration
    pub notifications: NotificationConfig,
    /// Log output
    pub telemetry: TelemetryConfig,
    /// Baselines of the simulated probes
    pub simulation: SimulationConfig,
    /// Experiment catalog to load at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load from `chaos.toml` in the working directory (if present) and the
    /// environment
    ///
    /// Environment variables use the `CHAOS` prefix and `__` as the nesting
    /// separator, e.g. `CHAOS__ORCHESTRATOR__WORKER_POOL_SIZE=8`.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(config::File::with_name("chaos").required(false))
    }

    /// Load from an explicit settings file plus the environment
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load_from(config::File::from(path).required(true))
    }

    fn load_from(
        file: config::File<config::FileSourceFile, config::FileFormat>,
    ) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("CHAOS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        debug!(
            pool = config.orchestrator.worker_pool_size,
            channels = ?config.notifications.channels(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Orchestrator tuning with alert rules routed to every configured channel
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut orchestrator = self.orchestrator.clone();
        if orchestrator.alert_channels.is_empty() {
            orchestrator.alert_channels = self.notifications.channels();
        }
        orchestrator
    }
}
