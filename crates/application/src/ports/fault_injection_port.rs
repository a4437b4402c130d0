//! Fault injection port
//!
//! One injector executes exactly one configured failure mode. Injectors are
//! created per run by a factory so that no fault state is shared between
//! concurrent runs.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{FailureConfig, FaultType, InjectionResult};
#[cfg(test)]
use mockall::automock;

use crate::cancellation::CancelSignal;
use crate::error::ApplicationError;

/// Executes one failure mode for a bounded duration
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FaultInjectionPort: Send + Sync {
    /// Fault this injector was configured with
    fn fault_type(&self) -> FaultType;

    /// Run the fault once
    ///
    /// Mechanism failures and skipped injections are reported on the result,
    /// never as an error. The call returns early when `cancel` fires.
    async fn inject(&self, target: Option<String>, cancel: CancelSignal) -> InjectionResult;

    /// Release anything the fault still holds; `false` if recovery failed
    async fn recover(&self) -> bool;

    /// Expected impact of the configured fault in `[0, 1]`
    fn impact_score(&self) -> f64;

    /// Whether a fault is currently active
    fn is_active(&self) -> bool;
}

/// Builds injectors from a failure configuration
#[cfg_attr(test, automock)]
pub trait FaultInjectorFactory: Send + Sync {
    /// Create an injector
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::Configuration` for an unsupported fault,
    /// before any side effect.
    fn create(
        &self,
        config: &FailureConfig,
    ) -> Result<Arc<dyn FaultInjectionPort>, ApplicationError>;
}
