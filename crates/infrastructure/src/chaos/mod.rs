//! Chaos engineering adapters
//!
//! The concrete fault injector and its mechanisms:
//! - `FaultGate`: armed call-level faults that instrumented code routes through
//! - `ChaosFaultInjector`: runs one configured failure mode per `inject` call
//! - `ChaosInjectorFactory`: builds a fresh injector per run
//! - `MemoryLeak` / `CpuSpike`: resource-consuming mechanisms
//! - `CustomFaultMechanism`: externally supplied mechanisms, looked up by name
//!
//! # Example
//!
//! ```ignore
//! use infrastructure::chaos::{Dependency, FaultGate};
//!
//! let rows = gate
//!     .wrap(Dependency::Database, async { repository.load().await })
//!     .await?;
//! ```

mod custom;
mod fault_gate;
mod fault_injector;
mod injector_factory;
mod resources;

#[cfg(test)]
pub use custom::MockCustomFaultMechanism;
pub use custom::{CustomFaultMechanism, CustomMechanisms};
pub use fault_gate::{
    ArmedFault, DEFAULT_GATE_TIMEOUT, Dependency, FaultGate, GateStats, InjectedError,
};
pub use fault_injector::ChaosFaultInjector;
pub use injector_factory::ChaosInjectorFactory;
pub use resources::{CpuSpike, LEAK_CHUNK_BYTES, MemoryLeak, ResourcePressure};
