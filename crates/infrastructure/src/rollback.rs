//! Rollback handler adapters

use std::fmt;
use std::sync::Arc;

use application::{RollbackHandler, RollbackRegistry};
use async_trait::async_trait;
use domain::{FaultType, RunId};
use tracing::{info, warn};

use crate::chaos::FaultGate;

/// Disarms gate faults
///
/// Built for one fault type, or for every armed fault when built with
/// [`GateRollbackHandler::all`].
#[derive(Debug, Clone)]
pub struct GateRollbackHandler {
    gate: Arc<FaultGate>,
    fault: Option<FaultType>,
}

impl GateRollbackHandler {
    /// Handler that disarms `fault`
    pub const fn new(gate: Arc<FaultGate>, fault: FaultType) -> Self {
        Self {
            gate,
            fault: Some(fault),
        }
    }

    /// Handler that disarms everything armed
    pub const fn all(gate: Arc<FaultGate>) -> Self {
        Self { gate, fault: None }
    }
}

#[async_trait]
impl RollbackHandler for GateRollbackHandler {
    async fn rollback(&self, run_id: &RunId) -> bool {
        match &self.fault {
            Some(fault) => {
                let was_armed = self.gate.disarm(fault);
                info!(run_id = %run_id, fault_type = %fault, was_armed, "Gate rollback");
            },
            None => {
                let count = self.gate.disarm_all();
                info!(run_id = %run_id, count, "Gate rollback of all faults");
            },
        }
        // Success means nothing the handler covers is left armed
        self.fault
            .as_ref()
            .map_or_else(|| self.gate.armed().is_empty(), |f| !self.gate.is_armed(f))
    }
}

type Callback = dyn Fn(&RunId) -> bool + Send + Sync;

/// Rollback delegated to a caller-supplied closure
#[derive(Clone)]
pub struct CallbackRollbackHandler {
    name: String,
    callback: Arc<Callback>,
}

impl fmt::Debug for CallbackRollbackHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRollbackHandler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl CallbackRollbackHandler {
    /// Wrap `callback` under a name used in logs
    pub fn new(
        name: impl Into<String>,
        callback: impl Fn(&RunId) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            callback: Arc::new(callback),
        }
    }
}

#[async_trait]
impl RollbackHandler for CallbackRollbackHandler {
    async fn rollback(&self, run_id: &RunId) -> bool {
        let succeeded = (self.callback)(run_id);
        if !succeeded {
            warn!(run_id = %run_id, handler = %self.name, "Rollback callback reported failure");
        }
        succeeded
    }
}

/// Registry covering every built-in gate fault
///
/// Gated faults get a dedicated handler; `Random` and anything without a
/// dedicated entry fall back to disarming the whole gate.
pub fn gate_rollback_registry(gate: &Arc<FaultGate>) -> RollbackRegistry {
    FaultType::COMPOSABLE
        .into_iter()
        .filter(FaultType::is_gated)
        .fold(RollbackRegistry::builder(), |builder, fault| {
            let handler = GateRollbackHandler::new(Arc::clone(gate), fault.clone());
            builder.register(fault, Arc::new(handler))
        })
        .fallback(Arc::new(GateRollbackHandler::all(Arc::clone(gate))))
        .build()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::chaos::ArmedFault;

    #[tokio::test]
    async fn gate_handler_disarms_its_fault_only() {
        let gate = Arc::new(FaultGate::new());
        gate.arm(FaultType::NetworkError, ArmedFault::new("refused"));
        gate.arm(FaultType::CacheError, ArmedFault::new("evicted"));

        let handler = GateRollbackHandler::new(Arc::clone(&gate), FaultType::NetworkError);
        assert!(handler.rollback(&RunId::from("r-1")).await);
        assert_eq!(gate.armed(), vec![FaultType::CacheError]);
    }

    #[tokio::test]
    async fn registry_falls_back_to_disarming_everything() {
        let gate = Arc::new(FaultGate::new());
        gate.arm(FaultType::Exception, ArmedFault::new("boom"));
        gate.arm(FaultType::DiskError, ArmedFault::new("ro"));

        let registry = gate_rollback_registry(&gate);
        assert_eq!(registry.len(), 6);
        let outcome = registry.invoke(&FaultType::Random, &RunId::from("r-1")).await;
        assert_eq!(outcome, Some(true));
        assert!(gate.armed().is_empty());
    }

    #[tokio::test]
    async fn callback_handler_reports_outcome() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let handler = CallbackRollbackHandler::new("restart-pods", move |run_id: &RunId| {
            counted.fetch_add(1, Ordering::SeqCst);
            run_id.as_str() != "r-fail"
        });

        assert!(handler.rollback(&RunId::from("r-1")).await);
        assert!(!handler.rollback(&RunId::from("r-fail")).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
