//! Application services

mod experiment_execution;
mod metrics_monitor;
mod notification_hub;
mod orchestrator;

pub use experiment_execution::ExperimentExecution;
pub use metrics_monitor::{DEFAULT_BUFFER_CAPACITY, ExportFormat, MetricsMonitor};
pub use notification_hub::{DEFAULT_DELIVERY_TIMEOUT, NotificationHub};
pub use orchestrator::{
    DEFAULT_WORKER_POOL_SIZE, ExperimentOrchestrator, OrchestratorConfig, RunSummary,
};
