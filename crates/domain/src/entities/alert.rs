//! Threshold alerts raised by the metrics monitor

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::experiment_config::AlertThresholds;
use crate::value_objects::{AlertId, MetricKind, RunId};

/// Breach size, as a share of the threshold's headroom, that escalates to critical
const CRITICAL_ESCALATION: f64 = 0.25;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Informational
    Info,
    /// Threshold crossed
    Warning,
    /// Threshold crossed by a wide margin
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Resolution state of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    /// Raised and not yet handled
    Active,
    /// Seen by an operator, still open
    Acknowledged,
    /// Closed
    Resolved,
}

/// A named threshold rule and the channels it notifies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Rule name
    pub name: String,
    /// Dimension the rule watches
    pub metric: MetricKind,
    /// Threshold value
    pub threshold: f64,
    /// Notification channel names
    #[serde(default)]
    pub channels: Vec<String>,
}

impl AlertRule {
    /// One rule per thresholded dimension
    pub fn from_thresholds(thresholds: &AlertThresholds, channels: &[String]) -> Vec<Self> {
        MetricKind::ALL
            .into_iter()
            .map(|metric| Self {
                name: format!("{metric}_threshold"),
                metric,
                threshold: thresholds.threshold_for(metric),
                channels: channels.to_vec(),
            })
            .collect()
    }

    /// Severity of a reading under this rule, or `None` if within bounds
    pub fn evaluate(&self, value: f64) -> Option<AlertSeverity> {
        if value.is_nan() {
            return None;
        }
        let (breached, overshoot, headroom) = if self.metric.lower_is_worse() {
            (value < self.threshold, self.threshold - value, self.threshold)
        } else {
            let headroom = if self.metric == MetricKind::ResponseTime {
                self.threshold
            } else {
                1.0 - self.threshold
            };
            (value > self.threshold, value - self.threshold, headroom)
        };
        if !breached {
            return None;
        }
        if headroom > 0.0 && overshoot / headroom >= CRITICAL_ESCALATION {
            Some(AlertSeverity::Critical)
        } else {
            Some(AlertSeverity::Warning)
        }
    }
}

/// An alert raised for a breached threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique id
    pub id: AlertId,
    /// Run the breaching sample belonged to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// Rule that fired
    pub rule: String,
    /// Offending metric
    pub metric: MetricKind,
    /// Severity
    pub severity: AlertSeverity,
    /// Observed value
    pub value: f64,
    /// Threshold crossed
    pub threshold: f64,
    /// Human-readable message
    pub message: String,
    /// When the alert was raised
    pub raised_at: DateTime<Utc>,
    /// Current resolution state
    pub state: AlertState,
    /// Set once, when resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Raise a new active alert
    pub fn raise(
        rule: &AlertRule,
        severity: AlertSeverity,
        value: f64,
        run_id: Option<RunId>,
    ) -> Self {
        let direction = if rule.metric.lower_is_worse() {
            "below"
        } else {
            "above"
        };
        Self {
            id: AlertId::new(),
            run_id,
            rule: rule.name.clone(),
            metric: rule.metric,
            severity,
            value,
            threshold: rule.threshold,
            message: format!(
                "{} {value:.3} is {direction} threshold {:.3}",
                rule.metric, rule.threshold
            ),
            raised_at: Utc::now(),
            state: AlertState::Active,
            resolved_at: None,
        }
    }

    /// Whether the alert is still open
    pub fn is_unresolved(&self) -> bool {
        self.state != AlertState::Resolved
    }

    /// Acknowledge an active alert; returns `false` if not active
    pub fn acknowledge(&mut self) -> bool {
        if self.state == AlertState::Active {
            self.state = AlertState::Acknowledged;
            true
        } else {
            false
        }
    }

    /// Resolve an open alert; returns `false` if already resolved
    pub fn resolve(&mut self) -> bool {
        if self.state == AlertState::Resolved {
            return false;
        }
        self.state = AlertState::Resolved;
        self.resolved_at = Some(Utc::now());
        true
    }
}
