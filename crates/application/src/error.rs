//! Application-level errors

use domain::{DomainError, ExperimentPhase};
use thiserror::Error;

/// Errors that can occur in the application layer
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// Domain-level error
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Unknown experiment, invalid definition or unsupported fault
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// System unhealthy before any fault was injected
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Unexpected failure inside a phase body
    #[error("Phase {phase} failed: {message}")]
    PhaseExecution { phase: String, message: String },

    /// Fault mechanism failure
    #[error("Injection error: {0}")]
    Injection(String),

    /// A metric probe failed
    #[error("Metric sampling failed: {0}")]
    Sampling(String),

    /// Notifier delivery failed
    #[error("Notification delivery failed: {0}")]
    Notification(String),

    /// The run was stopped by an operator
    #[error("Run cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApplicationError {
    /// Wrap an error raised inside a phase body
    ///
    /// Precondition failures and cancellation keep their identity.
    pub fn in_phase(phase: ExperimentPhase, error: Self) -> Self {
        match error {
            Self::Precondition(_) | Self::Cancelled | Self::PhaseExecution { .. } => error,
            other => Self::PhaseExecution {
                phase: phase.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Check if this error stems from an invalid or unknown definition
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Domain(DomainError::InvalidConfiguration(_))
        )
    }
}
