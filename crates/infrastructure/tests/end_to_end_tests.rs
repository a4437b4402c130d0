//! Full runs wired from the real injector, simulated probes and gate rollbacks

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use application::{
    ApplicationError, ExperimentOrchestrator, NotificationHub, NotifierPort, OrchestratorConfig,
};
use async_trait::async_trait;
use domain::{
    Alert, AlertRule, ExperimentConfig, ExperimentPhase, ExperimentResult, ExperimentStatus,
    FaultType, SafetyConfig,
};
use parking_lot::Mutex;

use infrastructure::{
    ChaosInjectorFactory, Dependency, FaultGate, InjectedError, ResourcePressure,
    SimulatedApplicationProbe, SimulatedSystemProbe, SimulationConfig, gate_rollback_registry,
};

#[derive(Debug, Default)]
struct Recorder {
    alerts: Mutex<Vec<Alert>>,
    results: Mutex<Vec<ExperimentResult>>,
}

#[async_trait]
impl NotifierPort for Recorder {
    async fn notify_alert(&self, alert: &Alert, _rule: &AlertRule) -> Result<(), ApplicationError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }

    async fn notify_result(&self, result: &ExperimentResult) -> Result<(), ApplicationError> {
        self.results.lock().push(result.clone());
        Ok(())
    }
}

struct Harness {
    orchestrator: ExperimentOrchestrator,
    gate: Arc<FaultGate>,
    recorder: Arc<Recorder>,
}

fn harness(definitions: Vec<ExperimentConfig>) -> Harness {
    let gate = Arc::new(FaultGate::new());
    let pressure = Arc::new(ResourcePressure::new());
    let simulation = SimulationConfig::default().without_jitter();

    let system = Arc::new(SimulatedSystemProbe::new(simulation.clone()).with_pressure(Arc::clone(&pressure)));
    let application = Arc::new(
        SimulatedApplicationProbe::new(simulation)
            .with_gate(Arc::clone(&gate))
            .with_pressure(Arc::clone(&pressure)),
    );
    let factory = ChaosInjectorFactory::new(Arc::clone(&gate), pressure).with_system_probe(system.clone());

    let recorder = Arc::new(Recorder::default());
    let hub = Arc::new(NotificationHub::new(Duration::from_secs(1)));
    hub.register("ops", recorder.clone());
    hub.init();

    let orchestrator = ExperimentOrchestrator::with_config(
        Arc::new(factory),
        system,
        application,
        gate_rollback_registry(&gate),
        OrchestratorConfig {
            alert_channels: vec!["ops".to_string()],
            ..OrchestratorConfig::default()
        },
    )
    .with_hub(hub);
    orchestrator.load(definitions).unwrap();

    Harness {
        orchestrator,
        gate,
        recorder,
    }
}

fn experiment(name: &str, fault: FaultType) -> ExperimentConfig {
    ExperimentConfig::new(name, fault, "service tolerates the fault").with_durations(
        Duration::from_secs(2),
        Duration::from_secs(5),
        Duration::from_secs(2),
    )
}

fn tolerant() -> SafetyConfig {
    SafetyConfig {
        rollback_threshold: 0.5,
        ..SafetyConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn network_fault_run_completes_every_phase() {
    let h = harness(vec![experiment("flaky-network", FaultType::NetworkError).with_safety(tolerant())]);

    let run_id = h.orchestrator.start("flaky-network", &HashMap::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(4_500)).await;

    assert!(h.gate.is_armed(&FaultType::NetworkError));
    let call = h
        .gate
        .wrap(Dependency::Network, async { Ok::<_, InjectedError>(1) })
        .await;
    assert!(matches!(call, Err(InjectedError::ConnectionRefused)));
    let unaffected = h
        .gate
        .wrap(Dependency::Cache, async { Ok::<_, InjectedError>(2) })
        .await;
    assert_eq!(unaffected.unwrap(), 2);

    let result = h.orchestrator.wait(&run_id).await.unwrap();
    assert_eq!(result.status, ExperimentStatus::Completed);
    assert_eq!(result.phases_completed, ExperimentPhase::ORDER.to_vec());
    assert!(!result.rollback_required);
    let injection = result.injection.as_ref().unwrap();
    assert!(injection.success);
    assert!(!injection.skipped);
    assert!(result.recovery_time.is_some());
    assert!(h.gate.armed().is_empty());

    let healthy = h
        .gate
        .wrap(Dependency::Network, async { Ok::<_, InjectedError>(3) })
        .await;
    assert_eq!(healthy.unwrap(), 3);

    assert!(!h.recorder.alerts.lock().is_empty());
    let results = h.recorder.results.lock();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].run_id, run_id);
}

#[tokio::test(start_paused = true)]
async fn database_outage_breach_rolls_back_through_gate() {
    let h = harness(vec![experiment("db-outage", FaultType::DatabaseError)]);

    let run_id = h.orchestrator.start("db-outage", &HashMap::new()).unwrap();
    let result = h.orchestrator.wait(&run_id).await.unwrap();

    assert!(result.rollback_required);
    assert_eq!(result.rollback_successful, Some(true));
    assert_eq!(result.hypothesis_validated, Some(false));
    assert!(h.gate.armed().is_empty());
    assert!(result.injection.as_ref().is_some_and(|i| i.interrupted));
}

#[tokio::test(start_paused = true)]
async fn stopping_mid_injection_cancels_and_disarms() {
    let h = harness(vec![experiment("slow-db", FaultType::Timeout).with_safety(tolerant())]);

    let run_id = h.orchestrator.start("slow-db", &HashMap::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert!(h.gate.is_armed(&FaultType::Timeout));

    assert!(h.orchestrator.stop(&run_id));
    let result = h.orchestrator.wait(&run_id).await.unwrap();
    assert_eq!(result.status, ExperimentStatus::Cancelled);
    assert!(h.gate.armed().is_empty());
    assert!(h.orchestrator.list_running().is_empty());
    assert_eq!(h.orchestrator.list_completed().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unregistered_custom_fault_is_rejected_at_start() {
    let h = harness(vec![experiment("dns", FaultType::Custom("dns".to_string()))]);

    let err = h.orchestrator.start("dns", &HashMap::new()).unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("custom:dns"));
}

#[tokio::test(start_paused = true)]
async fn overrides_reach_the_injector() {
    let h = harness(vec![experiment("slow-db", FaultType::Timeout).with_safety(tolerant())]);

    let overrides = HashMap::from([("timeout_ms".to_string(), serde_json::json!(750))]);
    let run_id = h.orchestrator.start("slow-db", &overrides).unwrap();
    tokio::time::sleep(Duration::from_millis(4_500)).await;

    let started = tokio::time::Instant::now();
    let call = h
        .gate
        .wrap(Dependency::Database, async { Ok::<_, InjectedError>(()) })
        .await;
    assert!(matches!(call, Err(InjectedError::Timeout(d)) if d == Duration::from_millis(750)));
    assert!(started.elapsed() >= Duration::from_millis(750));

    h.orchestrator.shutdown().await;
    assert_eq!(h.orchestrator.status(&run_id), Some(ExperimentStatus::Cancelled));
}
