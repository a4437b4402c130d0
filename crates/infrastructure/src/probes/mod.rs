//! Metric probe adapters
//!
//! Simulated probes that produce plausible readings around a configurable
//! baseline and degrade while faults are armed or resources are held.

mod simulated;

pub use simulated::{SimulatedApplicationProbe, SimulatedSystemProbe, SimulationConfig};
