//! Domain-level errors

use thiserror::Error;

/// Errors that can occur in the domain layer
#[derive(Debug, Error)]
pub enum DomainError {
    /// Experiment definition is structurally invalid
    #[error("Invalid experiment configuration: {0}")]
    InvalidConfiguration(String),

    /// A state machine transition was rejected
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Phase entered out of canonical order
    #[error("Phase {attempted} cannot follow {previous}")]
    PhaseOutOfOrder { previous: String, attempted: String },
}

impl DomainError {
    /// Create an invalid transition error
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
