//! Post-hoc impact analysis over one run's snapshots
//!
//! Always recomputed from snapshots; never stored as mutable state.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::experiment_config::AlertThresholds;
use super::metric_snapshot::MetricSnapshot;
use crate::serde_helpers::option_duration_secs;
use crate::value_objects::{MetricKind, RunId};

/// Share of samples above the error threshold that counts as sustained
const SUSTAINED_SHARE: f64 = 0.5;

/// Coarse impact classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    /// Peak impact below 0.25
    Low,
    /// Peak impact below 0.5
    Medium,
    /// Peak impact below 0.75
    High,
    /// Peak impact of 0.75 or more
    Critical,
}

impl ImpactLevel {
    /// Classify a peak impact score
    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            Self::Critical
        } else if score >= 0.5 {
            Self::High
        } else if score >= 0.25 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Min, max and mean of one dimension
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionRange {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl DimensionRange {
    fn over(values: impl Iterator<Item = f64>) -> Self {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut count = 0_u32;
        for value in values.filter(|v| v.is_finite()) {
            min = min.min(value);
            max = max.max(value);
            sum += value;
            count += 1;
        }
        if count == 0 {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
            };
        }
        Self {
            min,
            max,
            mean: sum / f64::from(count),
        }
    }
}

/// Aggregate impact of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    pub run_id: RunId,
    pub sample_count: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub cpu_usage: DimensionRange,
    pub memory_usage: DimensionRange,
    pub disk_usage: DimensionRange,
    pub error_rate: DimensionRange,
    pub response_time_ms: DimensionRange,
    pub availability: DimensionRange,
    pub impact_score: DimensionRange,
    /// Drop from baseline availability to the worst sample
    pub availability_impact: f64,
    /// `None` when recovery was never observed
    #[serde(with = "option_duration_secs")]
    pub recovery_time: Option<Duration>,
    pub baseline_deviation_avg: f64,
    pub impact_level: ImpactLevel,
    pub recommendations: Vec<String>,
}

impl ImpactAnalysis {
    /// Analyse the snapshots of `run_id`
    ///
    /// Samples from other runs are ignored. Returns `None` when the run has
    /// no samples. The baseline defaults to the run's first sample.
    pub fn compute(
        run_id: &RunId,
        snapshots: &[MetricSnapshot],
        baseline: Option<&MetricSnapshot>,
        recovery_time: Option<Duration>,
        thresholds: &AlertThresholds,
    ) -> Option<Self> {
        let samples: Vec<&MetricSnapshot> = snapshots
            .iter()
            .filter(|s| s.run_id.as_ref() == Some(run_id))
            .collect();
        let first = *samples.first()?;
        let last = *samples.last()?;
        let baseline = baseline.unwrap_or(first);

        let range = |metric: MetricKind| {
            DimensionRange::over(samples.iter().map(|s| s.value_of(metric)))
        };
        let availability = range(MetricKind::Availability);
        let impact_score = DimensionRange::over(samples.iter().map(|s| s.impact_score));
        let deviation = DimensionRange::over(samples.iter().map(|s| s.baseline_deviation));

        let mut analysis = Self {
            run_id: run_id.clone(),
            sample_count: samples.len(),
            window_start: first.timestamp,
            window_end: last.timestamp,
            cpu_usage: range(MetricKind::CpuUsage),
            memory_usage: range(MetricKind::MemoryUsage),
            disk_usage: range(MetricKind::DiskUsage),
            error_rate: range(MetricKind::ErrorRate),
            response_time_ms: range(MetricKind::ResponseTime),
            availability,
            impact_score,
            availability_impact: (baseline.application.availability - availability.min).max(0.0),
            recovery_time,
            baseline_deviation_avg: deviation.mean,
            impact_level: ImpactLevel::from_score(impact_score.max),
            recommendations: Vec::new(),
        };
        analysis.recommendations = analysis.threshold_recommendations(&samples, thresholds);
        Some(analysis)
    }

    fn threshold_recommendations(
        &self,
        samples: &[&MetricSnapshot],
        thresholds: &AlertThresholds,
    ) -> Vec<String> {
        let mut recommendations = Vec::new();

        let error_breaches = samples
            .iter()
            .filter(|s| thresholds.is_breached(MetricKind::ErrorRate, s.application.error_rate))
            .count();
        #[allow(clippy::cast_precision_loss)]
        let error_share = error_breaches as f64 / samples.len().max(1) as f64;
        if error_share >= SUSTAINED_SHARE {
            recommendations.push(
                "Sustained high error rate: add circuit breakers and retries with backoff around the failing dependency".to_string(),
            );
        } else if error_breaches > 0 {
            recommendations.push(
                "Transient error spikes observed: verify retry budgets and idempotency of retried calls".to_string(),
            );
        }

        if thresholds.is_breached(MetricKind::Availability, self.availability.min) {
            recommendations.push(
                "Minimum availability fell below target: add health checks and redundant instances behind the load balancer".to_string(),
            );
        }

        if thresholds.is_breached(MetricKind::ResponseTime, self.response_time_ms.max) {
            recommendations.push(
                "Response time exceeded its threshold: tighten client timeouts and consider caching hot paths".to_string(),
            );
        }

        if thresholds.is_breached(MetricKind::CpuUsage, self.cpu_usage.max) {
            recommendations.push(
                "CPU saturation observed: configure autoscaling or request limits for CPU-bound workloads".to_string(),
            );
        }

        if thresholds.is_breached(MetricKind::MemoryUsage, self.memory_usage.max) {
            recommendations.push(
                "Memory pressure observed: set memory limits and check for unbounded caches or leaks".to_string(),
            );
        }

        if thresholds.is_breached(MetricKind::DiskUsage, self.disk_usage.max) {
            recommendations.push(
                "Disk utilization exceeded its threshold: add log rotation and disk usage alerts".to_string(),
            );
        }

        recommendations
    }
}
