//! Metric probe ports
//!
//! The monitor calls both probes once per sampling tick and is agnostic to
//! whether they read real OS counters or simulated values.

use std::collections::BTreeMap;

use async_trait::async_trait;
use domain::{ApplicationMetrics, SystemMetrics};
#[cfg(test)]
use mockall::automock;

use crate::error::ApplicationError;

/// Source of system resource utilization
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SystemProbePort: Send + Sync {
    /// Read CPU, memory, disk and network utilization
    async fn collect(&self) -> Result<SystemMetrics, ApplicationError>;
}

/// Source of application health metrics
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApplicationProbePort: Send + Sync {
    /// Read latency, error rate, throughput and availability
    ///
    /// `custom` carries caller-supplied gauges that should be merged into the
    /// returned reading.
    async fn collect(
        &self,
        custom: &BTreeMap<String, f64>,
    ) -> Result<ApplicationMetrics, ApplicationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_system_object_safe(_: &dyn SystemProbePort) {}
    fn _assert_application_object_safe(_: &dyn ApplicationProbePort) {}

    #[test]
    fn traits_are_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn SystemProbePort>();
        assert_send_sync::<dyn ApplicationProbePort>();
    }

    #[tokio::test]
    async fn mock_application_probe_sees_custom_gauges() {
        let mut probe = MockApplicationProbePort::new();
        probe.expect_collect().returning(|custom| {
            Ok(ApplicationMetrics {
                custom: custom.clone(),
                ..ApplicationMetrics::neutral()
            })
        });

        let mut custom = BTreeMap::new();
        custom.insert("queue_depth".to_string(), 12.0);
        let reading = probe.collect(&custom).await.unwrap();
        assert_eq!(reading.custom.get("queue_depth"), Some(&12.0));
    }
}
