//! Infrastructure layer - Adapters for the chaos engine
//!
//! Implements ports defined in the application layer: the fault injector and
//! its mechanisms, simulated metric probes, rollback handlers and notifiers.
//! Also owns process configuration and log setup.

pub mod chaos;
pub mod config;
pub mod notifiers;
pub mod probes;
pub mod retry;
pub mod rollback;
pub mod telemetry;

pub use chaos::{
    ArmedFault, ChaosFaultInjector, ChaosInjectorFactory, CustomFaultMechanism, CustomMechanisms,
    Dependency, FaultGate, InjectedError, ResourcePressure,
};
pub use config::{AppConfig, ConfigError, ExperimentCatalog, NotificationConfig, WebhookChannel};
pub use notifiers::{LogNotifier, WebhookConfig, WebhookError, WebhookNotifier};
pub use probes::{SimulatedApplicationProbe, SimulatedSystemProbe, SimulationConfig};
pub use retry::{RetryConfig, Retryable, with_retry};
pub use rollback::{CallbackRollbackHandler, GateRollbackHandler, gate_rollback_registry};
pub use telemetry::{LogFormat, TelemetryConfig, TelemetryError, init_telemetry};
