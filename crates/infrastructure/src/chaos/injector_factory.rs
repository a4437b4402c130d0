//! Injector factory
//!
//! Every run gets its own injector. The gate and the pressure gauge are shared
//! so that probes and rollback handlers see every run's faults.

use std::sync::Arc;

use application::{ApplicationError, FaultInjectionPort, FaultInjectorFactory, SystemProbePort};
use domain::{FailureConfig, FaultType};
use tracing::debug;

use super::{ChaosFaultInjector, CustomMechanisms, FaultGate, ResourcePressure};

/// Builds [`ChaosFaultInjector`]s over a shared gate and pressure gauge
#[derive(Clone)]
pub struct ChaosInjectorFactory {
    gate: Arc<FaultGate>,
    pressure: Arc<ResourcePressure>,
    system_probe: Option<Arc<dyn SystemProbePort>>,
    custom: CustomMechanisms,
}

impl std::fmt::Debug for ChaosInjectorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosInjectorFactory")
            .field("gate", &self.gate)
            .field("pressure", &self.pressure)
            .field("custom", &self.custom)
            .finish_non_exhaustive()
    }
}

impl ChaosInjectorFactory {
    /// Create a factory without custom mechanisms
    pub fn new(gate: Arc<FaultGate>, pressure: Arc<ResourcePressure>) -> Self {
        Self {
            gate,
            pressure,
            system_probe: None,
            custom: CustomMechanisms::new(),
        }
    }

    /// Probe handed to injectors for resource conditions
    #[must_use]
    pub fn with_system_probe(mut self, probe: Arc<dyn SystemProbePort>) -> Self {
        self.system_probe = Some(probe);
        self
    }

    /// Registered custom mechanisms
    #[must_use]
    pub fn with_custom_mechanisms(mut self, custom: CustomMechanisms) -> Self {
        self.custom = custom;
        self
    }

    /// Shared fault gate
    pub const fn gate(&self) -> &Arc<FaultGate> {
        &self.gate
    }

    /// Shared pressure gauge
    pub const fn pressure(&self) -> &Arc<ResourcePressure> {
        &self.pressure
    }
}

impl FaultInjectorFactory for ChaosInjectorFactory {
    fn create(
        &self,
        config: &FailureConfig,
    ) -> Result<Arc<dyn FaultInjectionPort>, ApplicationError> {
        let mut injector = ChaosFaultInjector::new(
            config.clone(),
            Arc::clone(&self.gate),
            Arc::clone(&self.pressure),
        );

        if let FaultType::Custom(name) = &config.fault_type {
            let mechanism = self.custom.get(name).ok_or_else(|| {
                ApplicationError::Configuration(format!(
                    "unsupported fault type: {}",
                    config.fault_type
                ))
            })?;
            injector = injector.with_custom(mechanism);
        }
        if let Some(probe) = &self.system_probe {
            injector = injector.with_system_probe(Arc::clone(probe));
        }

        debug!(fault_type = %config.fault_type, mode = ?config.mode, "Injector created");
        Ok(Arc::new(injector))
    }
}
