//! Point-in-time metric snapshots
//!
//! Snapshots are produced only by the metrics monitor's sampling loop and are
//! immutable once created.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{MetricKind, RunId};

/// Response time treated as full impact when scoring
pub const RESPONSE_TIME_REFERENCE_MS: f64 = 1000.0;

const RESOURCE_WEIGHT: f64 = 0.4;
const ERROR_RATE_WEIGHT: f64 = 0.3;
const RESPONSE_TIME_WEIGHT: f64 = 0.2;
const AVAILABILITY_WEIGHT: f64 = 0.1;

/// Clamp a reading into `[0, 1]`, mapping NaN to zero
pub fn unit_interval(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// System resource utilization, each a fraction in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// CPU utilization
    pub cpu_usage: f64,
    /// Memory utilization
    pub memory_usage: f64,
    /// Disk utilization
    pub disk_usage: f64,
    /// Network utilization
    pub network_usage: f64,
}

impl SystemMetrics {
    /// Mean resource utilization across the four dimensions
    pub fn combined_utilization(&self) -> f64 {
        (unit_interval(self.cpu_usage)
            + unit_interval(self.memory_usage)
            + unit_interval(self.disk_usage)
            + unit_interval(self.network_usage))
            / 4.0
    }
}

/// Application-level health metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationMetrics {
    /// Mean response time in milliseconds
    pub response_time_ms: f64,
    /// Fraction of failed requests
    pub error_rate: f64,
    /// Requests per second
    pub throughput_rps: f64,
    /// Fraction of successful health probes
    pub availability: f64,
    /// Caller-supplied gauges
    #[serde(default)]
    pub custom: BTreeMap<String, f64>,
}

impl Default for ApplicationMetrics {
    fn default() -> Self {
        Self::neutral()
    }
}

impl ApplicationMetrics {
    /// Reading that neither raises alerts nor trips rollback
    pub const fn neutral() -> Self {
        Self {
            response_time_ms: 0.0,
            error_rate: 0.0,
            throughput_rps: 0.0,
            availability: 1.0,
            custom: BTreeMap::new(),
        }
    }
}

/// Combined system and application reading with derived scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Collection time
    pub timestamp: DateTime<Utc>,
    /// Monotonic tick number within the producing monitor
    pub sequence: u64,
    /// Run this sample belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// Resource utilization
    pub system: SystemMetrics,
    /// Application health
    pub application: ApplicationMetrics,
    /// Weighted impact in `[0, 1]`
    pub impact_score: f64,
    /// Mean absolute drift from the baseline snapshot
    pub baseline_deviation: f64,
    /// Whether a probe failed and neutral values were substituted
    #[serde(default)]
    pub substituted: bool,
}

impl MetricSnapshot {
    /// Build a snapshot and derive its impact score and baseline deviation
    pub fn new(
        sequence: u64,
        run_id: Option<RunId>,
        system: SystemMetrics,
        application: ApplicationMetrics,
        baseline: Option<&Self>,
    ) -> Self {
        let impact_score = impact_score(&system, &application);
        let baseline_deviation =
            baseline.map_or(0.0, |b| baseline_deviation(&system, &application, b));
        Self {
            timestamp: Utc::now(),
            sequence,
            run_id,
            system,
            application,
            impact_score,
            baseline_deviation,
            substituted: false,
        }
    }

    /// Build a zeroed snapshot standing in for a failed collection
    pub fn neutral(sequence: u64, run_id: Option<RunId>) -> Self {
        let mut snapshot = Self::new(
            sequence,
            run_id,
            SystemMetrics::default(),
            ApplicationMetrics::neutral(),
            None,
        );
        snapshot.substituted = true;
        snapshot
    }

    /// Reading for a thresholded dimension
    pub const fn value_of(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::CpuUsage => self.system.cpu_usage,
            MetricKind::MemoryUsage => self.system.memory_usage,
            MetricKind::DiskUsage => self.system.disk_usage,
            MetricKind::ErrorRate => self.application.error_rate,
            MetricKind::ResponseTime => self.application.response_time_ms,
            MetricKind::Availability => self.application.availability,
        }
    }

    /// Whether error rate and availability are both within `tolerance` of `baseline`
    pub fn within_tolerance_of(&self, baseline: &Self, tolerance: f64) -> bool {
        let error_delta = (self.application.error_rate - baseline.application.error_rate).abs();
        let availability_delta =
            (self.application.availability - baseline.application.availability).abs();
        error_delta < tolerance && availability_delta < tolerance
    }
}

/// Weighted impact score in `[0, 1]`
///
/// Resource utilization 40%, error rate 30%, response time 20%,
/// unavailability 10%. Every term is clamped before weighting.
pub fn impact_score(system: &SystemMetrics, application: &ApplicationMetrics) -> f64 {
    let resource = system.combined_utilization();
    let errors = unit_interval(application.error_rate);
    let latency = unit_interval(application.response_time_ms / RESPONSE_TIME_REFERENCE_MS);
    let unavailability = 1.0 - unit_interval(application.availability);

    let score = RESOURCE_WEIGHT * resource
        + ERROR_RATE_WEIGHT * errors
        + RESPONSE_TIME_WEIGHT * latency
        + AVAILABILITY_WEIGHT * unavailability;
    unit_interval(score)
}

/// Mean absolute delta between a reading and a baseline snapshot
pub fn baseline_deviation(
    system: &SystemMetrics,
    application: &ApplicationMetrics,
    baseline: &MetricSnapshot,
) -> f64 {
    let deltas = [
        system.cpu_usage - baseline.system.cpu_usage,
        system.memory_usage - baseline.system.memory_usage,
        system.disk_usage - baseline.system.disk_usage,
        system.network_usage - baseline.system.network_usage,
        application.error_rate - baseline.application.error_rate,
        application.availability - baseline.application.availability,
        (application.response_time_ms - baseline.application.response_time_ms)
            / RESPONSE_TIME_REFERENCE_MS,
    ];
    let finite: Vec<f64> = deltas
        .iter()
        .filter(|d| d.is_finite())
        .map(|d| d.abs())
        .collect();
    if finite.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let count = finite.len() as f64;
    finite.iter().sum::<f64>() / count
}
