//! Domain layer for the chaos engineering core
//!
//! Contains experiment definitions, the run state machine, metric snapshots,
//! alerts and impact analysis. This layer performs no I/O.

pub mod entities;
pub mod errors;
pub mod serde_helpers;
pub mod value_objects;

pub use entities::*;
pub use errors::DomainError;
pub use value_objects::*;
