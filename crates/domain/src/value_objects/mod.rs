//! Value Objects - Immutable, identity-less domain primitives

mod alert_id;
mod fault_type;
mod metric_kind;
mod run_id;

pub use alert_id::AlertId;
pub use fault_type::{FaultSeverity, FaultType};
pub use metric_kind::MetricKind;
pub use run_id::RunId;
