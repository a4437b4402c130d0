//! Builds the orchestrator and its adapters from settings

use std::sync::Arc;

use anyhow::Context;
use application::{ExperimentOrchestrator, NotificationHub};
use infrastructure::{
    AppConfig, ChaosInjectorFactory, FaultGate, LogNotifier, ResourcePressure,
    SimulatedApplicationProbe, SimulatedSystemProbe, WebhookNotifier, gate_rollback_registry,
};
use tracing::debug;

/// Everything a command needs to drive runs
#[derive(Debug)]
pub struct Runtime {
    pub orchestrator: ExperimentOrchestrator,
    pub hub: Arc<NotificationHub>,
    pub gate: Arc<FaultGate>,
}

impl Runtime {
    /// Cancel runs and stop notifier delivery
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
        self.hub.shutdown();
    }
}

/// Notification hub with every configured channel registered and started
pub fn notification_hub(config: &AppConfig) -> anyhow::Result<Arc<NotificationHub>> {
    let notifications = &config.notifications;
    let hub = Arc::new(NotificationHub::new(notifications.delivery_timeout()));
    if notifications.log {
        hub.register("log", Arc::new(LogNotifier));
    }
    for channel in &notifications.webhooks {
        let notifier = WebhookNotifier::new(channel.webhook.clone())
            .with_context(|| format!("webhook channel {}", channel.channel))?;
        debug!(channel = %channel.channel, url = notifier.url(), "Webhook channel registered");
        hub.register(channel.channel.clone(), Arc::new(notifier));
    }
    hub.init();
    Ok(hub)
}

/// Wire simulated probes, the chaos injector and gate rollbacks together
pub fn build(config: &AppConfig) -> anyhow::Result<Runtime> {
    let gate = Arc::new(FaultGate::new());
    let pressure = Arc::new(ResourcePressure::new());

    let system = Arc::new(
        SimulatedSystemProbe::new(config.simulation.clone()).with_pressure(Arc::clone(&pressure)),
    );
    let application = Arc::new(
        SimulatedApplicationProbe::new(config.simulation.clone())
            .with_gate(Arc::clone(&gate))
            .with_pressure(Arc::clone(&pressure)),
    );
    let injectors = ChaosInjectorFactory::new(Arc::clone(&gate), pressure)
        .with_system_probe(Arc::clone(&system) as _);

    let hub = notification_hub(config)?;
    let orchestrator = ExperimentOrchestrator::with_config(
        Arc::new(injectors),
        system,
        application,
        gate_rollback_registry(&gate),
        config.orchestrator_config(),
    )
    .with_hub(Arc::clone(&hub));

    Ok(Runtime {
        orchestrator,
        hub,
        gate,
    })
}
