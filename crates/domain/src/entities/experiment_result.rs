//! Experiment run record and its state machine
//!
//! # States
//!
//! `Pending → Running → {Completed | Failed | Cancelled}`
//!
//! While running, phases are entered strictly in canonical order:
//! `Preparation → SteadyState → ChaosInjection → Observation → Recovery → Analysis`.
//! `phases_completed` is therefore always a prefix of [`ExperimentPhase::ORDER`].
//! `end_time` and `duration` are written exactly once, on the terminal transition.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::failure::InjectionResult;
use super::impact_analysis::ImpactAnalysis;
use super::metric_snapshot::MetricSnapshot;
use crate::errors::DomainError;
use crate::serde_helpers::option_duration_secs;
use crate::value_objects::{FaultType, RunId};

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Registered, waiting for a worker
    Pending,
    /// Executing phases
    Running,
    /// All phases finished
    Completed,
    /// Aborted by an error
    Failed,
    /// Stopped by an operator
    Cancelled,
}

impl ExperimentStatus {
    /// Check if this is a terminal state (no further changes possible)
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Phase of a running experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentPhase {
    Preparation,
    SteadyState,
    ChaosInjection,
    Observation,
    Recovery,
    Analysis,
}

impl ExperimentPhase {
    /// Canonical phase ordering
    pub const ORDER: [Self; 6] = [
        Self::Preparation,
        Self::SteadyState,
        Self::ChaosInjection,
        Self::Observation,
        Self::Recovery,
        Self::Analysis,
    ];

    /// Position in the canonical ordering
    pub fn index(self) -> usize {
        Self::ORDER
            .iter()
            .position(|p| *p == self)
            .unwrap_or(Self::ORDER.len())
    }
}

impl fmt::Display for ExperimentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preparation => write!(f, "preparation"),
            Self::SteadyState => write!(f, "steady_state"),
            Self::ChaosInjection => write!(f, "chaos_injection"),
            Self::Observation => write!(f, "observation"),
            Self::Recovery => write!(f, "recovery"),
            Self::Analysis => write!(f, "analysis"),
        }
    }
}

/// Record of one experiment run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub run_id: RunId,
    pub experiment_name: String,
    pub fault_type: FaultType,
    pub hypothesis: String,
    pub status: ExperimentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<ExperimentPhase>,
    pub phases_completed: Vec<ExperimentPhase>,
    pub metrics_collected: Vec<MetricSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<MetricSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub injection: Option<InjectionResult>,
    pub issues_found: Vec<String>,
    pub recommendations: Vec<String>,
    pub rollback_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_successful: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hypothesis_validated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact_analysis: Option<ImpactAnalysis>,
    #[serde(with = "option_duration_secs")]
    pub recovery_time: Option<Duration>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(with = "option_duration_secs")]
    pub duration: Option<Duration>,
}

impl ExperimentResult {
    /// Create a pending record
    pub fn new(
        run_id: RunId,
        experiment_name: impl Into<String>,
        fault_type: FaultType,
        hypothesis: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            experiment_name: experiment_name.into(),
            fault_type,
            hypothesis: hypothesis.into(),
            status: ExperimentStatus::Pending,
            current_phase: None,
            phases_completed: Vec::new(),
            metrics_collected: Vec::new(),
            baseline: None,
            injection: None,
            issues_found: Vec::new(),
            recommendations: Vec::new(),
            rollback_required: false,
            rollback_successful: None,
            hypothesis_validated: None,
            impact_analysis: None,
            recovery_time: None,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            duration: None,
        }
    }

    /// `Pending → Running`
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidTransition` unless pending.
    pub fn start(&mut self) -> Result<(), DomainError> {
        if self.status != ExperimentStatus::Pending {
            return Err(DomainError::invalid_transition(
                self.status,
                ExperimentStatus::Running,
            ));
        }
        self.status = ExperimentStatus::Running;
        self.start_time = Some(Utc::now());
        Ok(())
    }

    /// Enter the next phase
    ///
    /// # Errors
    ///
    /// Fails unless running with no phase in progress and `phase` is the next
    /// one in canonical order.
    pub fn enter_phase(&mut self, phase: ExperimentPhase) -> Result<(), DomainError> {
        self.ensure_running(ExperimentStatus::Running)?;
        let expected = ExperimentPhase::ORDER.get(self.phases_completed.len());
        if self.current_phase.is_some() || expected != Some(&phase) {
            let previous = self
                .current_phase
                .or_else(|| self.phases_completed.last().copied())
                .map_or_else(|| "start".to_string(), |p| p.to_string());
            return Err(DomainError::PhaseOutOfOrder {
                previous,
                attempted: phase.to_string(),
            });
        }
        self.current_phase = Some(phase);
        Ok(())
    }

    /// Mark the current phase complete
    ///
    /// # Errors
    ///
    /// Fails unless `phase` is the phase in progress.
    pub fn complete_phase(&mut self, phase: ExperimentPhase) -> Result<(), DomainError> {
        self.ensure_running(ExperimentStatus::Running)?;
        if self.current_phase != Some(phase) {
            return Err(DomainError::PhaseOutOfOrder {
                previous: self
                    .current_phase
                    .map_or_else(|| "none".to_string(), |p| p.to_string()),
                attempted: phase.to_string(),
            });
        }
        self.phases_completed.push(phase);
        self.current_phase = None;
        Ok(())
    }

    /// Append a snapshot
    pub fn record_snapshot(&mut self, snapshot: MetricSnapshot) {
        self.metrics_collected.push(snapshot);
    }

    /// Flag that the fault must be rolled back
    ///
    /// # Errors
    ///
    /// Only allowed while running.
    pub fn require_rollback(&mut self) -> Result<(), DomainError> {
        self.ensure_running(ExperimentStatus::Failed)?;
        self.rollback_required = true;
        Ok(())
    }

    /// Record the outcome of the rollback handler
    ///
    /// # Errors
    ///
    /// Only allowed while running.
    pub fn record_rollback_outcome(&mut self, successful: bool) -> Result<(), DomainError> {
        self.ensure_running(ExperimentStatus::Failed)?;
        self.rollback_successful = Some(successful);
        Ok(())
    }

    /// Append an issue
    pub fn add_issue(&mut self, issue: impl Into<String>) {
        self.issues_found.push(issue.into());
    }

    /// `Running → Completed`
    ///
    /// # Errors
    ///
    /// Fails unless running.
    pub fn complete(&mut self) -> Result<(), DomainError> {
        self.finish(ExperimentStatus::Completed)
    }

    /// `Running → Failed`, recording the reason as an issue
    ///
    /// A pending run may also fail (e.g. it could not be scheduled).
    ///
    /// # Errors
    ///
    /// Fails if already terminal.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(
                self.status,
                ExperimentStatus::Failed,
            ));
        }
        self.add_issue(reason);
        self.finish(ExperimentStatus::Failed)
    }

    /// `{Pending | Running} → Cancelled`
    ///
    /// # Errors
    ///
    /// Fails if already terminal.
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        self.finish(ExperimentStatus::Cancelled)
    }

    fn finish(&mut self, terminal: ExperimentStatus) -> Result<(), DomainError> {
        let allowed = match terminal {
            ExperimentStatus::Completed => self.status == ExperimentStatus::Running,
            ExperimentStatus::Failed | ExperimentStatus::Cancelled => !self.status.is_terminal(),
            ExperimentStatus::Pending | ExperimentStatus::Running => false,
        };
        if !allowed || self.end_time.is_some() {
            return Err(DomainError::invalid_transition(self.status, terminal));
        }
        let end = Utc::now();
        self.status = terminal;
        self.current_phase = None;
        self.end_time = Some(end);
        self.duration = self
            .start_time
            .map(|start| (end - start).to_std().unwrap_or_default());
        Ok(())
    }

    fn ensure_running(&self, attempted: ExperimentStatus) -> Result<(), DomainError> {
        if self.status == ExperimentStatus::Running {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self.status, attempted))
        }
    }

    /// Whether `phases_completed` is a prefix of the canonical order
    pub fn phases_are_canonical_prefix(&self) -> bool {
        self.phases_completed.len() <= ExperimentPhase::ORDER.len()
            && self
                .phases_completed
                .iter()
                .zip(ExperimentPhase::ORDER.iter())
                .all(|(a, b)| a == b)
    }
}
