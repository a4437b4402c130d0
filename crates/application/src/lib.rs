//! Application layer - Use cases and orchestration
//!
//! Defines the ports the chaos core consumes (metric probes, fault injectors,
//! rollback handlers, notifiers) and the services that drive experiments:
//! the metrics monitor, the per-run execution state machine and the
//! orchestrator that schedules runs on a bounded worker pool.

pub mod cancellation;
pub mod error;
pub mod ports;
pub mod services;

pub use cancellation::CancelSignal;
pub use error::ApplicationError;
pub use ports::*;
pub use services::*;
