//! Experiment catalog file
//!
//! ```toml
//! [[experiments]]
//! name = "db-outage"
//! fault_type = "database_error"
//! hypothesis = "Checkout degrades gracefully"
//! steady_state_secs = 30
//! injection_secs = 60
//! observation_secs = 30
//! ```

use std::collections::HashSet;
use std::path::Path;

use domain::ExperimentConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ConfigError;

/// Experiment definitions loaded from disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentCatalog {
    #[serde(default)]
    experiments: Vec<ExperimentConfig>,
}

impl ExperimentCatalog {
    /// Parse and validate a catalog document
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML and
    /// `ConfigError::Invalid` for definitions that fail validation.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let catalog: Self = toml::from_str(source)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Read, parse and validate a catalog file
    ///
    /// # Errors
    ///
    /// As [`Self::from_toml_str`], plus `ConfigError::Io` if the file is unreadable.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_toml_str(&source)?;
        info!(path = %path.display(), count = catalog.len(), "Experiment catalog loaded");
        Ok(catalog)
    }

    /// Check every definition and reject duplicate names
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for experiment in &self.experiments {
            experiment
                .validate_definition()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            if !seen.insert(experiment.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate experiment name: {}",
                    experiment.name
                )));
            }
        }
        Ok(())
    }

    /// Definitions in file order
    pub fn experiments(&self) -> &[ExperimentConfig] {
        &self.experiments
    }

    /// Take ownership of the definitions
    pub fn into_experiments(self) -> Vec<ExperimentConfig> {
        self.experiments
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}
