//! Notification delivery port
//!
//! The core never performs delivery I/O itself; notifiers registered against a
//! channel name do.

use async_trait::async_trait;
use domain::{Alert, AlertRule, ExperimentResult};
#[cfg(test)]
use mockall::automock;

use crate::error::ApplicationError;

/// Delivers alerts and run results to one channel
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotifierPort: Send + Sync {
    /// Deliver an alert raised under `rule`
    async fn notify_alert(&self, alert: &Alert, rule: &AlertRule) -> Result<(), ApplicationError>;

    /// Deliver a terminal run result
    async fn notify_result(&self, result: &ExperimentResult) -> Result<(), ApplicationError>;
}
