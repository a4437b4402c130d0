//! Run identifier value object

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Identifier of one experiment run
///
/// Built from the experiment name and the creation timestamp. A process-wide
/// sequence suffix keeps ids unique when two runs start in the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh run id for the given experiment
    pub fn generate(experiment: &str) -> Self {
        Self::generate_at(experiment, Utc::now())
    }

    /// Generate a run id using an explicit creation time
    pub fn generate_at(experiment: &str, created_at: DateTime<Utc>) -> Self {
        let seq = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "{experiment}-{}-{seq}",
            created_at.format("%Y%m%dT%H%M%S%3f")
        ))
    }

    /// Wrap an existing id string (e.g. one received from an operator)
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
