//! Notification hub
//!
//! Explicit replacement for a process-wide alert manager: the outer layer
//! constructs one hub, registers notifiers by channel name, calls
//! [`NotificationHub::init`] and hands the hub to the orchestrator. Delivery is
//! bounded by a timeout; failures are logged and never propagated.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use domain::{Alert, AlertRule, ExperimentResult};
use parking_lot::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::ports::NotifierPort;

/// Default per-notifier delivery timeout
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry of notifiers keyed by channel name
pub struct NotificationHub {
    notifiers: RwLock<HashMap<String, Arc<dyn NotifierPort>>>,
    delivery_timeout: Duration,
    active: AtomicBool,
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels = self.channels();
        channels.sort();
        f.debug_struct("NotificationHub")
            .field("channels", &channels)
            .field("delivery_timeout", &self.delivery_timeout)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_DELIVERY_TIMEOUT)
    }
}

impl NotificationHub {
    /// Create an inactive hub
    pub fn new(delivery_timeout: Duration) -> Self {
        Self {
            notifiers: RwLock::new(HashMap::new()),
            delivery_timeout,
            active: AtomicBool::new(false),
        }
    }

    /// Register a notifier under `channel`, replacing any previous one
    pub fn register(&self, channel: impl Into<String>, notifier: Arc<dyn NotifierPort>) {
        let channel = channel.into();
        debug!(channel = %channel, "Registering notifier");
        self.notifiers.write().insert(channel, notifier);
    }

    /// Registered channel names
    pub fn channels(&self) -> Vec<String> {
        self.notifiers.read().keys().cloned().collect()
    }

    /// Start accepting deliveries
    pub fn init(&self) {
        self.active.store(true, Ordering::SeqCst);
        info!(channels = self.notifiers.read().len(), "Notification hub started");
    }

    /// Stop accepting deliveries and drop all notifiers
    pub fn shutdown(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.notifiers.write().clear();
        info!("Notification hub shut down");
    }

    /// Whether the hub is between `init` and `shutdown`
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Deliver an alert to the channels named by its rule
    ///
    /// Returns the number of successful deliveries.
    #[instrument(skip(self, alert, rule), fields(rule = %rule.name, metric = %alert.metric))]
    pub async fn notify_alert(&self, alert: &Alert, rule: &AlertRule) -> usize {
        let targets = self.resolve(&rule.channels);
        let mut delivered = 0;
        for (channel, notifier) in targets {
            let outcome = timeout(self.delivery_timeout, notifier.notify_alert(alert, rule)).await;
            if Self::record(&channel, outcome) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver a terminal run result to every registered channel
    ///
    /// Returns the number of successful deliveries.
    #[instrument(skip(self, result), fields(run_id = %result.run_id, status = %result.status))]
    pub async fn notify_result(&self, result: &ExperimentResult) -> usize {
        let targets = self.resolve(&self.channels());
        let mut delivered = 0;
        for (channel, notifier) in targets {
            let outcome = timeout(self.delivery_timeout, notifier.notify_result(result)).await;
            if Self::record(&channel, outcome) {
                delivered += 1;
            }
        }
        delivered
    }

    fn resolve(&self, channels: &[String]) -> Vec<(String, Arc<dyn NotifierPort>)> {
        if !self.is_active() {
            debug!("Notification hub inactive, dropping delivery");
            return Vec::new();
        }
        let notifiers = self.notifiers.read();
        channels
            .iter()
            .filter_map(|channel| match notifiers.get(channel) {
                Some(notifier) => Some((channel.clone(), Arc::clone(notifier))),
                None => {
                    warn!(channel = %channel, "No notifier registered for channel");
                    None
                },
            })
            .collect()
    }

    fn record(
        channel: &str,
        outcome: Result<Result<(), crate::ApplicationError>, tokio::time::error::Elapsed>,
    ) -> bool {
        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(channel = %channel, error = %e, "Notification delivery failed");
                false
            },
            Err(_) => {
                warn!(channel = %channel, "Notification delivery timed out");
                false
            },
        }
    }
}
