//! Experiment definition
//!
//! An `ExperimentConfig` is loaded once from an external catalog and never
//! mutated afterwards. Per-run parameter overrides produce a new value.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::failure::{ConditionalRule, FailureConfig, InjectionMode};
use crate::errors::DomainError;
use crate::serde_helpers::duration_secs;
use crate::value_objects::{FaultSeverity, FaultType, MetricKind};

const fn default_true() -> bool {
    true
}

const fn default_sampling_interval() -> Duration {
    Duration::from_secs(1)
}

const fn default_max_impact() -> f64 {
    0.8
}

const fn default_rollback_threshold() -> f64 {
    0.1
}

const fn default_recovery_tolerance() -> f64 {
    0.02
}

const fn default_recovery_timeout() -> Duration {
    Duration::from_secs(60)
}

const fn default_probability() -> f64 {
    1.0
}

/// Safety bounds applied while a fault is active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SafetyConfig {
    /// Impact score above which an active fault is aborted
    #[serde(default = "default_max_impact")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_impact: f64,

    /// Whether threshold breaches abort the fault and trigger rollback
    #[serde(default = "default_true")]
    pub auto_rollback: bool,

    /// Error rate above which (or availability below `1 - threshold`) the
    /// fault is rolled back
    #[serde(default = "default_rollback_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub rollback_threshold: f64,

    /// Maximum error-rate and availability delta from the baseline that
    /// counts as recovered
    #[serde(default = "default_recovery_tolerance")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub recovery_tolerance: f64,

    /// Upper bound on the recovery phase
    #[serde(
        with = "duration_secs",
        rename = "recovery_timeout_secs",
        default = "default_recovery_timeout"
    )]
    pub recovery_timeout: Duration,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_impact: default_max_impact(),
            auto_rollback: true,
            rollback_threshold: default_rollback_threshold(),
            recovery_tolerance: default_recovery_tolerance(),
            recovery_timeout: default_recovery_timeout(),
        }
    }
}

/// Alert thresholds per metric dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AlertThresholds {
    /// CPU utilization fraction
    #[validate(range(min = 0.0, max = 1.0))]
    pub cpu: f64,
    /// Memory utilization fraction
    #[validate(range(min = 0.0, max = 1.0))]
    pub memory: f64,
    /// Disk utilization fraction
    #[validate(range(min = 0.0, max = 1.0))]
    pub disk: f64,
    /// Error rate fraction
    #[validate(range(min = 0.0, max = 1.0))]
    pub error_rate: f64,
    /// Response time in milliseconds
    #[validate(range(min = 0.0))]
    pub response_time_ms: f64,
    /// Minimum availability fraction
    #[validate(range(min = 0.0, max = 1.0))]
    pub availability: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            cpu: 0.8,
            memory: 0.85,
            disk: 0.9,
            error_rate: 0.05,
            response_time_ms: 1000.0,
            availability: 0.95,
        }
    }
}

impl AlertThresholds {
    /// Threshold value for a dimension
    pub const fn threshold_for(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::CpuUsage => self.cpu,
            MetricKind::MemoryUsage => self.memory,
            MetricKind::DiskUsage => self.disk,
            MetricKind::ErrorRate => self.error_rate,
            MetricKind::ResponseTime => self.response_time_ms,
            MetricKind::Availability => self.availability,
        }
    }

    /// Whether a reading breaches the dimension's threshold
    pub fn is_breached(&self, metric: MetricKind, value: f64) -> bool {
        let threshold = self.threshold_for(metric);
        if metric.lower_is_worse() {
            value < threshold
        } else {
            value > threshold
        }
    }
}

/// How the fault is triggered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct InjectionSettings {
    /// Decision mode
    #[serde(default)]
    pub mode: InjectionMode,
    /// Fault severity
    #[serde(default)]
    pub severity: FaultSeverity,
    /// Probability for probabilistic mode
    #[serde(default = "default_probability")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub probability: f64,
    /// Whether the injector recovers on its own
    #[serde(default = "default_true")]
    pub auto_recovery: bool,
    /// Delay before the mechanism starts
    #[serde(with = "duration_secs", rename = "delay_secs", default)]
    pub delay: Duration,
    /// Rules for conditional mode
    #[serde(default)]
    pub conditions: Vec<ConditionalRule>,
}

impl Default for InjectionSettings {
    fn default() -> Self {
        Self {
            mode: InjectionMode::Immediate,
            severity: FaultSeverity::Medium,
            probability: default_probability(),
            auto_recovery: true,
            delay: Duration::ZERO,
            conditions: Vec::new(),
        }
    }
}

/// Immutable definition of a chaos experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ExperimentConfig {
    /// Unique experiment name
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,

    /// Free-form description
    #[serde(default)]
    pub description: String,

    /// Fault to inject
    pub fault_type: FaultType,

    /// Stated hypothesis
    #[validate(length(min = 1, message = "hypothesis is required"))]
    pub hypothesis: String,

    /// Baseline sampling window before the fault
    #[serde(with = "duration_secs", rename = "steady_state_secs")]
    pub steady_state_duration: Duration,

    /// How long the fault stays active
    #[serde(with = "duration_secs", rename = "injection_secs")]
    pub injection_duration: Duration,

    /// Sampling window after the fault
    #[serde(with = "duration_secs", rename = "observation_secs")]
    pub observation_duration: Duration,

    /// Interval between metric samples
    #[serde(
        with = "duration_secs",
        rename = "sampling_interval_secs",
        default = "default_sampling_interval"
    )]
    pub sampling_interval: Duration,

    /// Safety parameters
    #[serde(default)]
    #[validate(nested)]
    pub safety: SafetyConfig,

    /// Trigger settings
    #[serde(default)]
    #[validate(nested)]
    pub injection: InjectionSettings,

    /// Alert thresholds
    #[serde(default)]
    #[validate(nested)]
    pub alert_thresholds: AlertThresholds,

    /// Optional fault target (service, host, dependency)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Fault-specific tuning
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl ExperimentConfig {
    /// Create a definition with default safety, trigger and threshold settings
    pub fn new(
        name: impl Into<String>,
        fault_type: FaultType,
        hypothesis: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            fault_type,
            hypothesis: hypothesis.into(),
            steady_state_duration: Duration::from_secs(30),
            injection_duration: Duration::from_secs(60),
            observation_duration: Duration::from_secs(30),
            sampling_interval: default_sampling_interval(),
            safety: SafetyConfig::default(),
            injection: InjectionSettings::default(),
            alert_thresholds: AlertThresholds::default(),
            target: None,
            parameters: HashMap::new(),
        }
    }

    /// Set the three explicit phase durations
    #[must_use]
    pub const fn with_durations(
        mut self,
        steady_state: Duration,
        injection: Duration,
        observation: Duration,
    ) -> Self {
        self.steady_state_duration = steady_state;
        self.injection_duration = injection;
        self.observation_duration = observation;
        self
    }

    /// Set the sampling interval
    #[must_use]
    pub const fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    /// Replace the safety settings
    #[must_use]
    pub fn with_safety(mut self, safety: SafetyConfig) -> Self {
        self.safety = safety;
        self
    }

    /// Replace the trigger settings
    #[must_use]
    pub fn with_injection(mut self, injection: InjectionSettings) -> Self {
        self.injection = injection;
        self
    }

    /// Replace the alert thresholds
    #[must_use]
    pub fn with_alert_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.alert_thresholds = thresholds;
        self
    }

    /// Set the fault target
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set a tuning parameter
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Copy of this definition with caller overrides merged over `parameters`
    #[must_use]
    pub fn with_overrides(&self, overrides: &HashMap<String, serde_json::Value>) -> Self {
        let mut merged = self.clone();
        for (key, value) in overrides {
            merged.parameters.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Check structural constraints
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` naming the first problem found.
    pub fn validate_definition(&self) -> Result<(), DomainError> {
        self.validate()
            .map_err(|e| DomainError::InvalidConfiguration(format!("{}: {e}", self.name)))?;

        let durations = [
            ("steady_state_secs", self.steady_state_duration),
            ("injection_secs", self.injection_duration),
            ("observation_secs", self.observation_duration),
            ("sampling_interval_secs", self.sampling_interval),
            ("recovery_timeout_secs", self.safety.recovery_timeout),
        ];
        if let Some((field, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(DomainError::InvalidConfiguration(format!(
                "{}: {field} must be positive",
                self.name
            )));
        }

        if let FaultType::Custom(mechanism) = &self.fault_type {
            if mechanism.trim().is_empty() {
                return Err(DomainError::InvalidConfiguration(format!(
                    "{}: custom fault requires a mechanism name",
                    self.name
                )));
            }
        }

        if let Some(rule) = self
            .injection
            .conditions
            .iter()
            .find(|rule| !rule.is_well_formed())
        {
            return Err(DomainError::InvalidConfiguration(format!(
                "{}: malformed condition {rule:?}",
                self.name
            )));
        }

        if self.injection.mode == InjectionMode::Conditional && self.injection.conditions.is_empty()
        {
            return Err(DomainError::InvalidConfiguration(format!(
                "{}: conditional mode requires at least one condition",
                self.name
            )));
        }

        Ok(())
    }

    /// Failure config handed to the injector for this experiment
    pub fn failure_config(&self) -> FailureConfig {
        FailureConfig {
            fault_type: self.fault_type.clone(),
            mode: self.injection.mode,
            severity: self.injection.severity,
            probability: self.injection.probability,
            duration: self.injection_duration,
            delay: self.injection.delay,
            auto_recovery: self.injection.auto_recovery,
            conditions: self.injection.conditions.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// Whether a chaos-phase reading trips the rollback rule
    pub fn breaches_rollback(&self, error_rate: f64, availability: f64, impact: f64) -> bool {
        if !self.safety.auto_rollback {
            return false;
        }
        let threshold = self.safety.rollback_threshold;
        error_rate > threshold || availability < 1.0 - threshold || impact > self.safety.max_impact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::failure::ResourceKind;

    fn valid() -> ExperimentConfig {
        ExperimentConfig::new(
            "latency",
            FaultType::NetworkError,
            "checkout survives a flaky network",
        )
        .with_durations(
            Duration::from_secs(2),
            Duration::from_secs(3),
            Duration::from_secs(2),
        )
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate_definition().is_ok());
    }

    #[test]
    fn empty_name_rejected() {
        let mut config = valid();
        config.name = String::new();
        assert!(matches!(
            config.validate_definition(),
            Err(DomainError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn zero_duration_rejected() {
        let config = valid().with_durations(
            Duration::from_secs(2),
            Duration::ZERO,
            Duration::from_secs(2),
        );
        let err = config.validate_definition().unwrap_err();
        assert!(err.to_string().contains("injection_secs"));
    }

    #[test]
    fn probability_out_of_range_rejected() {
        let mut config = valid();
        config.injection.probability = 1.5;
        assert!(config.validate_definition().is_err());
    }

    #[test]
    fn conditional_mode_requires_rules() {
        let mut config = valid();
        config.injection.mode = InjectionMode::Conditional;
        assert!(config.validate_definition().is_err());

        config.injection.conditions.push(ConditionalRule::ResourceBelow {
            resource: ResourceKind::Cpu,
            max: 0.7,
        });
        assert!(config.validate_definition().is_ok());
    }

    #[test]
    fn blank_custom_mechanism_rejected() {
        let mut config = valid();
        config.fault_type = FaultType::Custom("  ".to_string());
        assert!(config.validate_definition().is_err());
    }

    #[test]
    fn overrides_win_over_stored_parameters() {
        let config = valid()
            .with_parameter("memory_mb", serde_json::json!(16))
            .with_parameter("workers", serde_json::json!(1));
        let overrides = HashMap::from([("memory_mb".to_string(), serde_json::json!(64))]);
        let merged = config.with_overrides(&overrides);
        assert_eq!(merged.parameters["memory_mb"], serde_json::json!(64));
        assert_eq!(merged.parameters["workers"], serde_json::json!(1));
        assert_eq!(config.parameters["memory_mb"], serde_json::json!(16));
    }

    #[test]
    fn failure_config_mirrors_definition() {
        let config = valid().with_parameter("memory_mb", serde_json::json!(8));
        let failure = config.failure_config();
        assert_eq!(failure.fault_type, FaultType::NetworkError);
        assert_eq!(failure.duration, Duration::from_secs(3));
        assert_eq!(failure.number_param("memory_mb"), Some(8.0));
    }

    #[test]
    fn rollback_rule_uses_threshold() {
        let config = valid();
        assert!(!config.breaches_rollback(0.05, 0.99, 0.1));
        assert!(config.breaches_rollback(0.2, 0.99, 0.1));
        assert!(config.breaches_rollback(0.0, 0.85, 0.1));
        assert!(config.breaches_rollback(0.0, 1.0, 0.95));
    }

    #[test]
    fn rollback_rule_disabled_without_auto_rollback() {
        let config = valid().with_safety(SafetyConfig {
            auto_rollback: false,
            ..SafetyConfig::default()
        });
        assert!(!config.breaches_rollback(0.9, 0.1, 1.0));
    }

    #[test]
    fn thresholds_respect_direction() {
        let thresholds = AlertThresholds::default();
        assert!(thresholds.is_breached(MetricKind::CpuUsage, 0.95));
        assert!(!thresholds.is_breached(MetricKind::CpuUsage, 0.5));
        assert!(thresholds.is_breached(MetricKind::Availability, 0.9));
        assert!(!thresholds.is_breached(MetricKind::Availability, 0.99));
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{
            "name": "disk",
            "fault_type": "disk_error",
            "hypothesis": "writes are retried",
            "steady_state_secs": 5,
            "injection_secs": 10,
            "observation_secs": 5
        }"#;
        let config: ExperimentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sampling_interval, Duration::from_secs(1));
        assert!(config.safety.auto_rollback);
        assert_eq!(config.injection.mode, InjectionMode::Immediate);
        assert!(config.validate_definition().is_ok());
    }

    #[test]
    fn missing_required_field_fails_to_parse() {
        let json = r#"{"name": "disk", "fault_type": "disk_error"}"#;
        assert!(serde_json::from_str::<ExperimentConfig>(json).is_err());
    }
}
