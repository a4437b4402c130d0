//! Domain entities - Objects with identity and lifecycle

mod alert;
mod experiment_config;
mod experiment_result;
mod failure;
mod impact_analysis;
mod metric_snapshot;

pub use alert::{Alert, AlertRule, AlertSeverity, AlertState};
pub use experiment_config::{AlertThresholds, ExperimentConfig, InjectionSettings, SafetyConfig};
pub use experiment_result::{ExperimentPhase, ExperimentResult, ExperimentStatus};
pub use failure::{
    ConditionalRule, FailureConfig, IMPACT_DURATION_REFERENCE, InjectionMode, InjectionResult,
    ResourceKind,
};
pub use impact_analysis::{DimensionRange, ImpactAnalysis, ImpactLevel};
pub use metric_snapshot::{
    ApplicationMetrics, MetricSnapshot, RESPONSE_TIME_REFERENCE_MS, SystemMetrics,
    baseline_deviation, impact_score, unit_interval,
};
