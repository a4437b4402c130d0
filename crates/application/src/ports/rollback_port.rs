//! Rollback handler port and the fault-type-indexed handler table
//!
//! Handlers are registered once, before the orchestrator is constructed. The
//! built [`RollbackRegistry`] is immutable and shared without locking.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{FaultType, RunId};
#[cfg(test)]
use mockall::automock;
use tracing::{info, warn};

/// Reverses the effects of one fault type
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RollbackHandler: Send + Sync {
    /// Roll back the fault of `run_id`; `true` on success
    async fn rollback(&self, run_id: &RunId) -> bool;
}

/// Read-only table of rollback handlers keyed by fault type
#[derive(Clone, Default)]
pub struct RollbackRegistry {
    handlers: Arc<HashMap<FaultType, Arc<dyn RollbackHandler>>>,
    fallback: Option<Arc<dyn RollbackHandler>>,
}

impl fmt::Debug for RollbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<String> = self.handlers.keys().map(ToString::to_string).collect();
        kinds.sort();
        f.debug_struct("RollbackRegistry")
            .field("handlers", &kinds)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl RollbackRegistry {
    /// Start building a registry
    pub fn builder() -> RollbackRegistryBuilder {
        RollbackRegistryBuilder::default()
    }

    /// Handler registered for `fault`, or the fallback handler
    pub fn handler_for(&self, fault: &FaultType) -> Option<Arc<dyn RollbackHandler>> {
        self.handlers
            .get(fault)
            .or(self.fallback.as_ref())
            .map(Arc::clone)
    }

    /// Number of fault-specific handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler (including a fallback) is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.fallback.is_none()
    }

    /// Invoke the handler for `fault`
    ///
    /// Returns `None` when no handler is registered.
    pub async fn invoke(&self, fault: &FaultType, run_id: &RunId) -> Option<bool> {
        let Some(handler) = self.handler_for(fault) else {
            warn!(fault_type = %fault, run_id = %run_id, "No rollback handler registered");
            return None;
        };
        let succeeded = handler.rollback(run_id).await;
        info!(fault_type = %fault, run_id = %run_id, succeeded, "Rollback handler finished");
        Some(succeeded)
    }
}

/// Builder for [`RollbackRegistry`]
#[derive(Default)]
pub struct RollbackRegistryBuilder {
    handlers: HashMap<FaultType, Arc<dyn RollbackHandler>>,
    fallback: Option<Arc<dyn RollbackHandler>>,
}

impl fmt::Debug for RollbackRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackRegistryBuilder")
            .field("handlers", &self.handlers.len())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl RollbackRegistryBuilder {
    /// Register the handler for one fault type, replacing any previous one
    #[must_use]
    pub fn register(mut self, fault: FaultType, handler: Arc<dyn RollbackHandler>) -> Self {
        self.handlers.insert(fault, handler);
        self
    }

    /// Register the same handler for several fault types
    #[must_use]
    pub fn register_all(
        mut self,
        faults: impl IntoIterator<Item = FaultType>,
        handler: &Arc<dyn RollbackHandler>,
    ) -> Self {
        for fault in faults {
            self.handlers.insert(fault, Arc::clone(handler));
        }
        self
    }

    /// Handler used for fault types without a dedicated entry
    #[must_use]
    pub fn fallback(mut self, handler: Arc<dyn RollbackHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Freeze the table
    pub fn build(self) -> RollbackRegistry {
        RollbackRegistry {
            handlers: Arc::new(self.handlers),
            fallback: self.fallback,
        }
    }
}
