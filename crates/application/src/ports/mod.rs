//! Port definitions for application layer
//!
//! Ports are interfaces that define how the chaos core interacts with
//! external systems. Adapters in the infrastructure layer implement these ports.

mod fault_injection_port;
mod metric_probe_port;
mod notifier_port;
mod rollback_port;

#[cfg(test)]
pub use fault_injection_port::{MockFaultInjectionPort, MockFaultInjectorFactory};
pub use fault_injection_port::{FaultInjectionPort, FaultInjectorFactory};
#[cfg(test)]
pub use metric_probe_port::{MockApplicationProbePort, MockSystemProbePort};
pub use metric_probe_port::{ApplicationProbePort, SystemProbePort};
#[cfg(test)]
pub use notifier_port::MockNotifierPort;
pub use notifier_port::NotifierPort;
#[cfg(test)]
pub use rollback_port::MockRollbackHandler;
pub use rollback_port::{RollbackHandler, RollbackRegistry, RollbackRegistryBuilder};
