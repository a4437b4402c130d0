//! Failure configuration and injection outcome
//!
//! A `FailureConfig` is the immutable description of one injection attempt.
//! An `InjectionResult` is produced exactly once per `inject` call.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::serde_helpers::duration_secs;
use crate::value_objects::{FaultSeverity, FaultType};

/// Reference duration the injector impact score normalises against
pub const IMPACT_DURATION_REFERENCE: Duration = Duration::from_secs(300);

/// How the injector decides whether to proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionMode {
    /// Always proceed
    #[default]
    Immediate,
    /// Proceed with the configured probability
    Probabilistic,
    /// Proceed only if every conditional rule passes
    Conditional,
}

/// Resource a conditional gate reads from the system probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// CPU utilization fraction
    Cpu,
    /// Memory utilization fraction
    Memory,
    /// Disk utilization fraction
    Disk,
    /// Network utilization fraction
    Network,
}

/// A rule evaluated by `InjectionMode::Conditional`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ConditionalRule {
    /// Inject only while the UTC hour lies in `[start_hour, end_hour)`
    ///
    /// A window whose start is after its end wraps around midnight.
    TimeWindow { start_hour: u8, end_hour: u8 },
    /// Inject only while a resource reading stays below `max`
    ResourceBelow { resource: ResourceKind, max: f64 },
}

impl ConditionalRule {
    /// Check a time window rule against an instant
    ///
    /// Resource rules always return `true` here; they need a probe reading.
    pub fn time_allows(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::TimeWindow {
                start_hour,
                end_hour,
            } => {
                let hour = u8::try_from(now.hour()).unwrap_or(0);
                if start_hour == end_hour {
                    true
                } else if start_hour < end_hour {
                    (*start_hour..*end_hour).contains(&hour)
                } else {
                    hour >= *start_hour || hour < *end_hour
                }
            },
            Self::ResourceBelow { .. } => true,
        }
    }

    /// Check whether the rule's hour fields are in range
    pub fn is_well_formed(&self) -> bool {
        match self {
            Self::TimeWindow {
                start_hour,
                end_hour,
            } => *start_hour < 24 && *end_hour < 24,
            Self::ResourceBelow { max, .. } => (0.0..=1.0).contains(max),
        }
    }
}

/// Immutable description of one injection attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureConfig {
    /// Which fault mechanism to run
    pub fault_type: FaultType,
    /// Decision mode
    pub mode: InjectionMode,
    /// Fault severity
    pub severity: FaultSeverity,
    /// Probability used by `Probabilistic` mode (0.0 to 1.0)
    pub probability: f64,
    /// How long the fault stays active
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    /// Delay before the mechanism starts
    #[serde(with = "duration_secs")]
    pub delay: Duration,
    /// Whether the injector recovers on its own once the duration elapses
    pub auto_recovery: bool,
    /// Rules for `Conditional` mode
    pub conditions: Vec<ConditionalRule>,
    /// Fault-specific tuning
    pub parameters: HashMap<String, serde_json::Value>,
}

impl FailureConfig {
    /// Create a failure config with immediate mode and default tuning
    pub fn new(fault_type: FaultType, duration: Duration) -> Self {
        Self {
            fault_type,
            mode: InjectionMode::Immediate,
            severity: FaultSeverity::Medium,
            probability: 1.0,
            duration,
            delay: Duration::ZERO,
            auto_recovery: true,
            conditions: Vec::new(),
            parameters: HashMap::new(),
        }
    }

    /// Set the decision mode
    #[must_use]
    pub const fn with_mode(mut self, mode: InjectionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the severity
    #[must_use]
    pub const fn with_severity(mut self, severity: FaultSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the injection probability
    #[must_use]
    pub const fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }

    /// Set the delay before activation
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Enable or disable automatic recovery
    #[must_use]
    pub const fn with_auto_recovery(mut self, auto_recovery: bool) -> Self {
        self.auto_recovery = auto_recovery;
        self
    }

    /// Add a conditional rule
    #[must_use]
    pub fn with_condition(mut self, rule: ConditionalRule) -> Self {
        self.conditions.push(rule);
        self
    }

    /// Set a tuning parameter
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Read a numeric tuning parameter
    pub fn number_param(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(serde_json::Value::as_f64)
    }

    /// Read a string tuning parameter
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(serde_json::Value::as_str)
    }

    /// Expected impact of this fault in `[0, 1]`
    ///
    /// Weighted blend of the severity base weight (50%), the duration
    /// normalised against five minutes (30%) and the probability (20%).
    pub fn impact_score(&self) -> f64 {
        let duration_term = (self.duration.as_secs_f64()
            / IMPACT_DURATION_REFERENCE.as_secs_f64())
        .min(1.0);
        let probability = if self.probability.is_nan() {
            0.0
        } else {
            self.probability.clamp(0.0, 1.0)
        };
        let score = self.severity.base_weight().mul_add(
            0.5,
            duration_term.mul_add(0.3, probability * 0.2),
        );
        score.min(1.0)
    }
}

/// Outcome of a single `inject` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionResult {
    /// Fault that was requested
    pub fault_type: FaultType,
    /// Concrete mechanisms that ran (more than one for `Random`)
    pub mechanisms: Vec<FaultType>,
    /// Whether the fault was actually applied
    pub success: bool,
    /// Whether the decision mode skipped injection
    pub skipped: bool,
    /// Human-readable summary
    pub message: String,
    /// Captured mechanism error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Target the fault was aimed at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// When `inject` was called
    pub started_at: DateTime<Utc>,
    /// When `inject` returned
    pub ended_at: DateTime<Utc>,
    /// Whether the active duration was cut short by cancellation
    pub interrupted: bool,
    /// Computed impact score of the fault
    pub impact_score: f64,
    /// `None` if recovery was not attempted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_successful: Option<bool>,
}

impl InjectionResult {
    /// Result for an injection the decision mode declined
    pub fn skipped(fault_type: FaultType, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            fault_type,
            mechanisms: Vec::new(),
            success: false,
            skipped: true,
            message: reason.into(),
            error: None,
            target: None,
            started_at: now,
            ended_at: now,
            interrupted: false,
            impact_score: 0.0,
            recovery_successful: None,
        }
    }

    /// Elapsed wall time of the call
    pub fn elapsed(&self) -> Duration {
        (self.ended_at - self.started_at).to_std().unwrap_or_default()
    }
}
