//! Notifier that writes alerts and results to the tracing log

use application::{ApplicationError, NotifierPort};
use async_trait::async_trait;
use domain::{Alert, AlertRule, AlertSeverity, ExperimentResult, ExperimentStatus};
use tracing::{error, info, warn};

/// Logs every delivery as a structured event
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl LogNotifier {
    /// Create the notifier
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotifierPort for LogNotifier {
    async fn notify_alert(&self, alert: &Alert, rule: &AlertRule) -> Result<(), ApplicationError> {
        match alert.severity {
            AlertSeverity::Critical => error!(
                alert_id = %alert.id,
                rule = %rule.name,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                "Critical alert"
            ),
            AlertSeverity::Warning => warn!(
                alert_id = %alert.id,
                rule = %rule.name,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                "Alert"
            ),
            AlertSeverity::Info => info!(
                alert_id = %alert.id,
                rule = %rule.name,
                metric = %alert.metric,
                value = alert.value,
                "Alert"
            ),
        }
        Ok(())
    }

    async fn notify_result(&self, result: &ExperimentResult) -> Result<(), ApplicationError> {
        let phases = result.phases_completed.len();
        let issues = result.issues_found.len();
        match result.status {
            ExperimentStatus::Failed => error!(
                run_id = %result.run_id,
                experiment = %result.experiment_name,
                phases,
                issues,
                "Experiment failed"
            ),
            status => info!(
                run_id = %result.run_id,
                experiment = %result.experiment_name,
                %status,
                phases,
                issues,
                rollback_required = result.rollback_required,
                "Experiment finished"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use domain::{AlertThresholds, FaultType, MetricKind, RunId};

    use super::*;

    #[tokio::test]
    async fn log_delivery_never_fails() {
        let notifier = LogNotifier::new();
        let rule = AlertRule {
            name: "error_rate_threshold".to_string(),
            metric: MetricKind::ErrorRate,
            threshold: AlertThresholds::default().error_rate,
            channels: vec!["log".to_string()],
        };
        let alert = Alert::raise(&rule, AlertSeverity::Critical, 0.4, None);
        assert!(notifier.notify_alert(&alert, &rule).await.is_ok());

        let result = ExperimentResult::new(RunId::from("r-1"), "r", FaultType::Exception, "holds");
        assert!(notifier.notify_result(&result).await.is_ok());
    }
}
