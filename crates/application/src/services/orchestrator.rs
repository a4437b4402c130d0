//! Experiment orchestrator
//!
//! Registry of named experiment definitions and scheduler of runs. Each
//! `start` creates a fresh injector and monitor, registers the run as
//! running and submits it to a bounded worker pool; runs beyond the pool
//! size stay `Pending` until a worker frees up.
//!
//! The running and completed tables live behind one mutex. The rollback
//! registry is immutable after construction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use domain::{
    ExperimentConfig, ExperimentPhase, ExperimentResult, ExperimentStatus, RunId,
};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::ApplicationError;
use crate::ports::{
    ApplicationProbePort, FaultInjectorFactory, RollbackRegistry, SystemProbePort,
};
use crate::services::{DEFAULT_BUFFER_CAPACITY, ExperimentExecution, MetricsMonitor, NotificationHub};

/// Default number of concurrently executing runs
pub const DEFAULT_WORKER_POOL_SIZE: usize = 5;

const COMPLETION_CHANNEL_CAPACITY: usize = 64;

/// Orchestrator tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum concurrently executing runs
    pub worker_pool_size: usize,
    /// Ring buffer capacity of each run's monitor
    pub monitor_capacity: usize,
    /// Notification channels alert rules deliver to
    pub alert_channels: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            monitor_capacity: DEFAULT_BUFFER_CAPACITY,
            alert_channels: Vec::new(),
        }
    }
}

/// Operator-facing view of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub experiment: String,
    pub status: ExperimentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<ExperimentPhase>,
    pub phases_completed: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&ExperimentResult> for RunSummary {
    fn from(result: &ExperimentResult) -> Self {
        Self {
            run_id: result.run_id.clone(),
            experiment: result.experiment_name.clone(),
            status: result.status,
            current_phase: result.current_phase,
            phases_completed: result.phases_completed.len(),
            created_at: result.created_at,
        }
    }
}

struct TrackedRun {
    execution: Arc<ExperimentExecution>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct RunTable {
    running: HashMap<RunId, TrackedRun>,
    completed: HashMap<RunId, ExperimentResult>,
}

/// Shared pieces a worker task needs once the caller has returned
#[derive(Clone)]
struct WorkerContext {
    workers: Arc<Semaphore>,
    runs: Arc<Mutex<RunTable>>,
    hub: Option<Arc<NotificationHub>>,
    completions: broadcast::Sender<RunId>,
}

/// Top-level registry and scheduler of experiment runs
pub struct ExperimentOrchestrator {
    definitions: RwLock<BTreeMap<String, ExperimentConfig>>,
    injectors: Arc<dyn FaultInjectorFactory>,
    system_probe: Arc<dyn SystemProbePort>,
    application_probe: Arc<dyn ApplicationProbePort>,
    rollbacks: RollbackRegistry,
    config: OrchestratorConfig,
    ctx: WorkerContext,
}

impl std::fmt::Debug for ExperimentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentOrchestrator")
            .field("definitions", &self.definitions.read().len())
            .field("running", &self.ctx.runs.lock().running.len())
            .field("completed", &self.ctx.runs.lock().completed.len())
            .field("rollbacks", &self.rollbacks)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExperimentOrchestrator {
    /// Create an orchestrator with an empty catalog
    pub fn new(
        injectors: Arc<dyn FaultInjectorFactory>,
        system_probe: Arc<dyn SystemProbePort>,
        application_probe: Arc<dyn ApplicationProbePort>,
        rollbacks: RollbackRegistry,
    ) -> Self {
        Self::with_config(
            injectors,
            system_probe,
            application_probe,
            rollbacks,
            OrchestratorConfig::default(),
        )
    }

    /// Create an orchestrator with explicit tuning
    pub fn with_config(
        injectors: Arc<dyn FaultInjectorFactory>,
        system_probe: Arc<dyn SystemProbePort>,
        application_probe: Arc<dyn ApplicationProbePort>,
        rollbacks: RollbackRegistry,
        config: OrchestratorConfig,
    ) -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);
        Self {
            definitions: RwLock::new(BTreeMap::new()),
            injectors,
            system_probe,
            application_probe,
            rollbacks,
            ctx: WorkerContext {
                workers: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
                runs: Arc::new(Mutex::new(RunTable::default())),
                hub: None,
                completions,
            },
            config,
        }
    }

    /// Deliver alerts and terminal results through `hub`
    #[must_use]
    pub fn with_hub(mut self, hub: Arc<NotificationHub>) -> Self {
        self.ctx.hub = Some(hub);
        self
    }

    /// Register experiment definitions
    ///
    /// All definitions are validated before any is registered; a later
    /// definition with the same name replaces an earlier one.
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::Configuration` for the first invalid definition.
    #[instrument(skip(self, configs))]
    pub fn load(
        &self,
        configs: impl IntoIterator<Item = ExperimentConfig>,
    ) -> Result<usize, ApplicationError> {
        let configs: Vec<ExperimentConfig> = configs.into_iter().collect();
        for config in &configs {
            config
                .validate_definition()
                .map_err(|e| ApplicationError::Configuration(e.to_string()))?;
        }

        let count = configs.len();
        let mut definitions = self.definitions.write();
        for config in configs {
            debug!(experiment = %config.name, fault_type = %config.fault_type, "Definition loaded");
            definitions.insert(config.name.clone(), config);
        }
        info!(count, total = definitions.len(), "Experiment definitions loaded");
        Ok(count)
    }

    /// Start a run of `name` with parameter overrides
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::Configuration` synchronously if `name` is
    /// unknown, the merged definition is invalid or the fault is unsupported.
    #[instrument(skip(self, overrides))]
    pub fn start(
        &self,
        name: &str,
        overrides: &HashMap<String, serde_json::Value>,
    ) -> Result<RunId, ApplicationError> {
        let config = self
            .definitions
            .read()
            .get(name)
            .map(|c| c.with_overrides(overrides))
            .ok_or_else(|| ApplicationError::Configuration(format!("unknown experiment: {name}")))?;
        config
            .validate_definition()
            .map_err(|e| ApplicationError::Configuration(e.to_string()))?;

        let injector = self.injectors.create(&config.failure_config())?;
        let run_id = RunId::generate(&config.name);

        let mut monitor = MetricsMonitor::new(
            Arc::clone(&self.system_probe),
            Arc::clone(&self.application_probe),
        )
        .with_run_id(run_id.clone())
        .with_capacity(self.config.monitor_capacity)
        .with_thresholds(config.alert_thresholds.clone())
        .with_alert_channels(&self.config.alert_channels);
        if let Some(hub) = &self.ctx.hub {
            monitor = monitor.with_hub(Arc::clone(hub));
        }

        let execution = Arc::new(ExperimentExecution::new(
            run_id.clone(),
            config,
            injector,
            Arc::new(monitor),
            self.rollbacks.clone(),
        ));

        self.ctx.runs.lock().running.insert(
            run_id.clone(),
            TrackedRun {
                execution: Arc::clone(&execution),
                handle: None,
            },
        );
        let handle = tokio::spawn(self.ctx.clone().drive(execution));
        if let Some(run) = self.ctx.runs.lock().running.get_mut(&run_id) {
            run.handle = Some(handle);
        }

        info!(run_id = %run_id, "Run scheduled");
        Ok(run_id)
    }

    /// Request cancellation of a running run
    ///
    /// Returns `false` if no such run is running.
    pub fn stop(&self, run_id: &RunId) -> bool {
        let runs = self.ctx.runs.lock();
        let Some(run) = runs.running.get(run_id) else {
            debug!(run_id = %run_id, "Stop ignored, run not running");
            return false;
        };
        run.execution.request_stop();
        true
    }

    /// Status of a run, `None` if unknown
    pub fn status(&self, run_id: &RunId) -> Option<ExperimentStatus> {
        let runs = self.ctx.runs.lock();
        runs.running
            .get(run_id)
            .map(|run| run.execution.status())
            .or_else(|| runs.completed.get(run_id).map(|result| result.status))
    }

    /// Result record of a run, `None` if unknown
    pub fn result(&self, run_id: &RunId) -> Option<ExperimentResult> {
        let runs = self.ctx.runs.lock();
        runs.running
            .get(run_id)
            .map(|run| run.execution.snapshot())
            .or_else(|| runs.completed.get(run_id).cloned())
    }

    /// Monitor of a running run
    pub fn monitor(&self, run_id: &RunId) -> Option<Arc<MetricsMonitor>> {
        self.ctx
            .runs
            .lock()
            .running
            .get(run_id)
            .map(|run| Arc::clone(run.execution.monitor()))
    }

    /// Loaded definitions, ordered by name
    pub fn list_definitions(&self) -> Vec<ExperimentConfig> {
        self.definitions.read().values().cloned().collect()
    }

    /// Runs not yet terminal, oldest first
    pub fn list_running(&self) -> Vec<RunSummary> {
        let mut running: Vec<RunSummary> = self
            .ctx
            .runs
            .lock()
            .running
            .values()
            .map(|run| RunSummary::from(&run.execution.snapshot()))
            .collect();
        running.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        running
    }

    /// Terminal results, in completion order
    pub fn list_completed(&self) -> Vec<ExperimentResult> {
        let mut completed: Vec<ExperimentResult> =
            self.ctx.runs.lock().completed.values().cloned().collect();
        completed.sort_by(|a, b| a.end_time.cmp(&b.end_time));
        completed
    }

    /// Wait until `run_id` reaches a terminal state
    ///
    /// Returns `None` if the run is unknown.
    pub async fn wait(&self, run_id: &RunId) -> Option<ExperimentResult> {
        let mut completions = self.ctx.completions.subscribe();
        {
            let runs = self.ctx.runs.lock();
            if let Some(result) = runs.completed.get(run_id) {
                return Some(result.clone());
            }
            if !runs.running.contains_key(run_id) {
                return None;
            }
        }
        loop {
            match completions.recv().await {
                Ok(done) if done == *run_id => return self.result(run_id),
                Ok(_) => {},
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if let Some(result) = self.ctx.runs.lock().completed.get(run_id) {
                        return Some(result.clone());
                    }
                },
                Err(broadcast::error::RecvError::Closed) => return self.result(run_id),
            }
        }
    }

    /// Cancel every run and wait for all of them to finish
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.ctx.workers.close();
        let handles: Vec<JoinHandle<()>> = {
            let mut runs = self.ctx.runs.lock();
            runs.running
                .values_mut()
                .filter_map(|run| {
                    run.execution.request_stop();
                    run.handle.take()
                })
                .collect()
        };
        info!(runs = handles.len(), "Shutting down orchestrator");
        for outcome in join_all(handles).await {
            if let Err(e) = outcome {
                warn!(error = %e, "Run task ended abnormally");
            }
        }
    }
}

impl WorkerContext {
    /// Wait for a worker, execute the run and move it to the completed table
    async fn drive(self, execution: Arc<ExperimentExecution>) {
        let permit = tokio::select! {
            biased;
            () = execution.cancel_signal().cancelled() => None,
            permit = Arc::clone(&self.workers).acquire_owned() => permit.ok(),
        };

        let result = match permit {
            Some(_permit) => execution.run().await,
            None => execution.cancel_pending(),
        };

        let run_id = result.run_id.clone();
        {
            let mut runs = self.runs.lock();
            runs.running.remove(&run_id);
            runs.completed.insert(run_id.clone(), result.clone());
        }
        info!(run_id = %run_id, status = %result.status, "Run finished");
        let _ = self.completions.send(run_id);

        if let Some(hub) = &self.hub {
            hub.notify_result(&result).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use domain::{
        ApplicationMetrics, FailureConfig, FaultType, InjectionResult, SystemMetrics,
    };

    use super::*;
    use crate::cancellation::CancelSignal;
    use crate::ports::{
        FaultInjectionPort, MockApplicationProbePort, MockFaultInjectorFactory,
        MockNotifierPort, MockSystemProbePort,
    };

    struct SleepyInjector {
        config: FailureConfig,
        active: AtomicBool,
    }

    #[async_trait]
    impl FaultInjectionPort for SleepyInjector {
        fn fault_type(&self) -> FaultType {
            self.config.fault_type.clone()
        }

        async fn inject(&self, target: Option<String>, cancel: CancelSignal) -> InjectionResult {
            let started_at = Utc::now();
            self.active.store(true, Ordering::SeqCst);
            let completed = cancel.sleep(self.config.duration).await;
            self.active.store(false, Ordering::SeqCst);
            InjectionResult {
                fault_type: self.config.fault_type.clone(),
                mechanisms: vec![self.config.fault_type.clone()],
                success: true,
                skipped: false,
                message: "applied".to_string(),
                error: None,
                target,
                started_at,
                ended_at: Utc::now(),
                interrupted: !completed,
                impact_score: self.config.impact_score(),
                recovery_successful: Some(true),
            }
        }

        async fn recover(&self) -> bool {
            self.active.store(false, Ordering::SeqCst);
            true
        }

        fn impact_score(&self) -> f64 {
            self.config.impact_score()
        }

        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
    }

    fn factory(created: Arc<AtomicUsize>) -> Arc<MockFaultInjectorFactory> {
        let mut factory = MockFaultInjectorFactory::new();
        factory.expect_create().returning(move |config| {
            if matches!(config.fault_type, FaultType::Custom(_)) {
                return Err(ApplicationError::Configuration(format!(
                    "unsupported fault type: {}",
                    config.fault_type
                )));
            }
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(SleepyInjector {
                config: config.clone(),
                active: AtomicBool::new(false),
            }))
        });
        Arc::new(factory)
    }

    fn orchestrator_with(pool: usize, created: Arc<AtomicUsize>) -> ExperimentOrchestrator {
        orchestrator_with_factory(pool, factory(created))
    }

    fn orchestrator_with_factory(
        pool: usize,
        factory: Arc<MockFaultInjectorFactory>,
    ) -> ExperimentOrchestrator {
        let mut system = MockSystemProbePort::new();
        system.expect_collect().returning(|| Ok(SystemMetrics::default()));
        let mut application = MockApplicationProbePort::new();
        application
            .expect_collect()
            .returning(|_| Ok(ApplicationMetrics::neutral()));

        let orchestrator = ExperimentOrchestrator::with_config(
            factory,
            Arc::new(system),
            Arc::new(application),
            RollbackRegistry::default(),
            OrchestratorConfig {
                worker_pool_size: pool,
                ..OrchestratorConfig::default()
            },
        );
        orchestrator
            .load(vec![
                ExperimentConfig::new("latency", FaultType::Timeout, "clients time out cleanly")
                    .with_durations(
                        Duration::from_secs(2),
                        Duration::from_secs(3),
                        Duration::from_secs(2),
                    ),
            ])
            .unwrap();
        orchestrator
    }

    fn orchestrator() -> ExperimentOrchestrator {
        orchestrator_with(DEFAULT_WORKER_POOL_SIZE, Arc::new(AtomicUsize::new(0)))
    }

    #[test]
    fn load_rejects_invalid_definitions() {
        let orchestrator = orchestrator();
        let invalid = ExperimentConfig::new("broken", FaultType::Timeout, "x").with_durations(
            Duration::ZERO,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let err = orchestrator
            .load(vec![
                ExperimentConfig::new("fine", FaultType::Exception, "x"),
                invalid,
            ])
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(orchestrator.list_definitions().len(), 1);
    }

    #[tokio::test]
    async fn unknown_name_fails_synchronously() {
        let orchestrator = orchestrator();
        let err = orchestrator.start("missing", &HashMap::new()).unwrap_err();
        assert!(err.is_configuration());
        assert!(orchestrator.list_running().is_empty());
    }

    #[tokio::test]
    async fn unsupported_fault_fails_before_scheduling() {
        let created = Arc::new(AtomicUsize::new(0));
        let orchestrator = orchestrator_with(1, Arc::clone(&created));
        orchestrator
            .load(vec![ExperimentConfig::new(
                "dns",
                FaultType::Custom("dns".to_string()),
                "resolvers fail over",
            )])
            .unwrap();

        assert!(orchestrator.start("dns", &HashMap::new()).is_err());
        assert_eq!(created.load(Ordering::SeqCst), 0);
        assert!(orchestrator.list_running().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_completes_and_moves_to_completed() {
        let orchestrator = orchestrator();
        let run_id = orchestrator.start("latency", &HashMap::new()).unwrap();
        assert!(orchestrator.status(&run_id).is_some());

        let result = orchestrator.wait(&run_id).await.unwrap();
        assert_eq!(result.status, ExperimentStatus::Completed);
        assert_eq!(result.phases_completed, ExperimentPhase::ORDER.to_vec());
        assert!(result.metrics_collected.len() >= 7);

        assert!(orchestrator.list_running().is_empty());
        assert_eq!(orchestrator.list_completed().len(), 1);
        assert_eq!(orchestrator.result(&run_id), orchestrator.result(&run_id));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_starts_get_independent_runs() {
        let orchestrator = orchestrator();
        let first = orchestrator.start("latency", &HashMap::new()).unwrap();
        let second = orchestrator.start("latency", &HashMap::new()).unwrap();
        assert_ne!(first, second);

        let a = orchestrator.wait(&first).await.unwrap();
        let b = orchestrator.wait(&second).await.unwrap();
        assert_eq!(a.status, ExperimentStatus::Completed);
        assert_eq!(b.status, ExperimentStatus::Completed);
        assert!(a.metrics_collected.iter().all(|s| s.run_id.as_ref() == Some(&first)));
        assert!(b.metrics_collected.iter().all(|s| s.run_id.as_ref() == Some(&second)));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_running_run_cancels_it() {
        let orchestrator = orchestrator();
        let run_id = orchestrator.start("latency", &HashMap::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(orchestrator.status(&run_id), Some(ExperimentStatus::Running));

        assert!(orchestrator.stop(&run_id));
        let result = orchestrator.wait(&run_id).await.unwrap();
        assert_eq!(result.status, ExperimentStatus::Cancelled);
        assert!(!orchestrator.stop(&run_id));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_on_completed_or_unknown_run_is_false() {
        let orchestrator = orchestrator();
        let run_id = orchestrator.start("latency", &HashMap::new()).unwrap();
        orchestrator.wait(&run_id).await.unwrap();
        assert!(!orchestrator.stop(&run_id));
        assert!(!orchestrator.stop(&RunId::from("nope")));
        assert_eq!(orchestrator.status(&RunId::from("nope")), None);
        assert!(orchestrator.result(&RunId::from("nope")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn excess_runs_wait_for_a_worker() {
        let orchestrator = orchestrator_with(1, Arc::new(AtomicUsize::new(0)));
        let first = orchestrator.start("latency", &HashMap::new()).unwrap();
        let second = orchestrator.start("latency", &HashMap::new()).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(orchestrator.status(&first), Some(ExperimentStatus::Running));
        assert_eq!(orchestrator.status(&second), Some(ExperimentStatus::Pending));

        // Cancelling a queued run never starts it
        assert!(orchestrator.stop(&second));
        let queued = orchestrator.wait(&second).await.unwrap();
        assert_eq!(queued.status, ExperimentStatus::Cancelled);
        assert!(queued.start_time.is_none());

        let done = orchestrator.wait(&first).await.unwrap();
        assert_eq!(done.status, ExperimentStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn overrides_reach_the_injector_config() {
        let seen = Arc::new(Mutex::new(Vec::<FailureConfig>::new()));
        let mut factory = MockFaultInjectorFactory::new();
        let captured = Arc::clone(&seen);
        factory.expect_create().times(1).returning(move |config| {
            captured.lock().push(config.clone());
            Ok(Arc::new(SleepyInjector {
                config: config.clone(),
                active: AtomicBool::new(false),
            }))
        });
        let orchestrator = orchestrator_with_factory(DEFAULT_WORKER_POOL_SIZE, Arc::new(factory));

        let mut overrides = HashMap::new();
        overrides.insert("delay_ms".to_string(), serde_json::json!(250));
        let run_id = orchestrator.start("latency", &overrides).unwrap();
        let result = orchestrator.wait(&run_id).await.unwrap();
        assert_eq!(result.status, ExperimentStatus::Completed);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].number_param("delay_ms"), Some(250.0));
        assert_eq!(seen[0].fault_type, FaultType::Timeout);

        // The loaded definition keeps its own parameters
        let stored = &orchestrator.list_definitions()[0];
        assert!(stored.parameters.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_everything() {
        let orchestrator = orchestrator_with(1, Arc::new(AtomicUsize::new(0)));
        let first = orchestrator.start("latency", &HashMap::new()).unwrap();
        let second = orchestrator.start("latency", &HashMap::new()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        orchestrator.shutdown().await;
        assert!(orchestrator.list_running().is_empty());
        assert_eq!(orchestrator.status(&first), Some(ExperimentStatus::Cancelled));
        assert_eq!(orchestrator.status(&second), Some(ExperimentStatus::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_results_are_notified() {
        let hub = Arc::new(NotificationHub::default());
        let mut notifier = MockNotifierPort::new();
        notifier.expect_notify_result().times(1).returning(|_| Ok(()));
        notifier.expect_notify_alert().returning(|_, _| Ok(()));
        hub.register("ops", Arc::new(notifier));
        hub.init();

        let orchestrator = orchestrator().with_hub(Arc::clone(&hub));
        let run_id = orchestrator.start("latency", &HashMap::new()).unwrap();
        orchestrator.wait(&run_id).await.unwrap();
        // Delivery happens right after the completion broadcast
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
