//! Single-run experiment state machine
//!
//! An execution owns one injector and one monitor and drives them through
//! the six phases in canonical order. Every wait inside a phase parks on the
//! run's [`CancelSignal`], so `stop` takes effect within one sampling interval.
//!
//! Failures never escape [`ExperimentExecution::run`]: they terminate the run
//! as `Failed` and are recorded on the result.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use domain::{
    DomainError, ExperimentConfig, ExperimentPhase, ExperimentResult, ExperimentStatus,
    ImpactAnalysis, InjectionResult, MetricKind, MetricSnapshot, RunId,
};
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, instrument, warn};

use crate::cancellation::CancelSignal;
use crate::error::ApplicationError;
use crate::ports::{FaultInjectionPort, RollbackRegistry};
use crate::services::MetricsMonitor;

/// Drives one run through its phases
pub struct ExperimentExecution {
    config: ExperimentConfig,
    injector: Arc<dyn FaultInjectionPort>,
    monitor: Arc<MetricsMonitor>,
    rollbacks: RollbackRegistry,
    cancel: CancelSignal,
    result: Mutex<ExperimentResult>,
    rollback_invoked: AtomicBool,
}

impl std::fmt::Debug for ExperimentExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = self.result.lock();
        f.debug_struct("ExperimentExecution")
            .field("run_id", &result.run_id)
            .field("experiment", &self.config.name)
            .field("status", &result.status)
            .field("current_phase", &result.current_phase)
            .field("injector", &"<FaultInjectionPort>")
            .finish_non_exhaustive()
    }
}

impl ExperimentExecution {
    /// Create a pending execution
    pub fn new(
        run_id: RunId,
        config: ExperimentConfig,
        injector: Arc<dyn FaultInjectionPort>,
        monitor: Arc<MetricsMonitor>,
        rollbacks: RollbackRegistry,
    ) -> Self {
        let result = ExperimentResult::new(
            run_id,
            config.name.clone(),
            config.fault_type.clone(),
            config.hypothesis.clone(),
        );
        Self {
            config,
            injector,
            monitor,
            rollbacks,
            cancel: CancelSignal::new(),
            result: Mutex::new(result),
            rollback_invoked: AtomicBool::new(false),
        }
    }

    /// Run identifier
    pub fn run_id(&self) -> RunId {
        self.result.lock().run_id.clone()
    }

    /// Experiment definition this run executes
    pub const fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Monitor observing this run
    pub const fn monitor(&self) -> &Arc<MetricsMonitor> {
        &self.monitor
    }

    /// Current status
    pub fn status(&self) -> ExperimentStatus {
        self.result.lock().status
    }

    /// Copy of the result record as it stands
    pub fn snapshot(&self) -> ExperimentResult {
        self.result.lock().clone()
    }

    /// Cancellation signal of this run
    pub const fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Request cooperative cancellation
    pub fn request_stop(&self) {
        info!(run_id = %self.run_id(), "Stop requested");
        self.cancel.cancel();
    }

    /// Cancel a run that never got a worker
    pub fn cancel_pending(&self) -> ExperimentResult {
        let mut result = self.result.lock();
        if let Err(e) = result.cancel() {
            debug!(error = %e, "Pending run already terminal");
        }
        result.clone()
    }

    /// Execute all phases and return the terminal result
    #[instrument(skip(self), fields(run_id = %self.run_id(), experiment = %self.config.name))]
    pub async fn run(&self) -> ExperimentResult {
        if self.cancel.is_cancelled() {
            return self.cancel_pending();
        }
        let started = self.result.lock().start();
        if let Err(e) = started {
            error!(error = %e, "Run could not start");
            return self.snapshot();
        }
        info!(fault_type = %self.config.fault_type, "Run started");

        match self.drive_phases().await {
            Ok(()) => {
                self.finish(ExperimentResult::complete);
                info!("Run completed");
            },
            Err(ApplicationError::Cancelled) => {
                self.cleanup().await;
                self.finish(ExperimentResult::cancel);
                warn!("Run cancelled");
            },
            Err(e) => {
                error!(error = %e, "Run failed");
                if self.config.safety.auto_rollback {
                    self.invoke_rollback().await;
                }
                self.cleanup().await;
                let message = e.to_string();
                self.finish(move |r| r.fail(message));
            },
        }
        self.snapshot()
    }

    fn finish(&self, transition: impl FnOnce(&mut ExperimentResult) -> Result<(), DomainError>) {
        let mut result = self.result.lock();
        if let Err(e) = transition(&mut result) {
            warn!(error = %e, "Terminal transition rejected");
        }
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut ExperimentResult) -> Result<T, DomainError>,
    ) -> Result<T, ApplicationError> {
        Ok(f(&mut self.result.lock())?)
    }

    async fn drive_phases(&self) -> Result<(), ApplicationError> {
        // Subscribe before sampling starts so the first tick is observed
        let mut snapshots = self.monitor.subscribe();

        for phase in ExperimentPhase::ORDER {
            if self.cancel.is_cancelled() {
                return Err(ApplicationError::Cancelled);
            }
            self.update(|r| r.enter_phase(phase))?;
            info!(phase = %phase, "Entering phase");

            let outcome = match phase {
                ExperimentPhase::Preparation => self.preparation().await,
                ExperimentPhase::SteadyState => self.steady_state(&mut snapshots).await,
                ExperimentPhase::ChaosInjection => self.chaos_injection(&mut snapshots).await,
                ExperimentPhase::Observation => self.observation(&mut snapshots).await,
                ExperimentPhase::Recovery => self.recovery(&mut snapshots).await,
                ExperimentPhase::Analysis => {
                    self.analysis();
                    Ok(())
                },
            };
            outcome.map_err(|e| ApplicationError::in_phase(phase, e))?;

            self.update(|r| r.complete_phase(phase))?;
            debug!(phase = %phase, "Phase completed");
        }
        Ok(())
    }

    async fn preparation(&self) -> Result<(), ApplicationError> {
        let reading = self.monitor.probe_reading().await.map_err(|e| {
            ApplicationError::Precondition(format!("unable to read system health: {e}"))
        })?;
        let thresholds = &self.config.alert_thresholds;
        let error_rate = reading.application.error_rate;
        let availability = reading.application.availability;

        if thresholds.is_breached(MetricKind::ErrorRate, error_rate) {
            return Err(ApplicationError::Precondition(format!(
                "error rate {error_rate:.3} already above {:.3}",
                thresholds.error_rate
            )));
        }
        if thresholds.is_breached(MetricKind::Availability, availability) {
            return Err(ApplicationError::Precondition(format!(
                "availability {availability:.3} already below {:.3}",
                thresholds.availability
            )));
        }

        self.monitor.start(self.config.sampling_interval);
        Ok(())
    }

    async fn steady_state(
        &self,
        snapshots: &mut broadcast::Receiver<MetricSnapshot>,
    ) -> Result<(), ApplicationError> {
        let deadline = Instant::now() + self.config.steady_state_duration;
        // Samples collected during preparation are recorded but never the baseline
        let first_steady = self.monitor.next_sequence();
        while let Some(snapshot) = self.next_snapshot(snapshots, deadline).await? {
            if snapshot.sequence >= first_steady && self.result.lock().baseline.is_none() {
                debug!(sequence = snapshot.sequence, "Baseline established");
                self.monitor.set_baseline(snapshot.clone());
                self.result.lock().baseline = Some(snapshot.clone());
            }
            self.record(snapshot);
        }

        if self.result.lock().baseline.is_none() {
            // Steady state shorter than one tick
            let snapshot = self.monitor.sample_now().await;
            self.monitor.set_baseline(snapshot.clone());
            let mut result = self.result.lock();
            result.baseline = Some(snapshot.clone());
            result.record_snapshot(snapshot);
        }
        Ok(())
    }

    async fn chaos_injection(
        &self,
        snapshots: &mut broadcast::Receiver<MetricSnapshot>,
    ) -> Result<(), ApplicationError> {
        let injection_cancel = self.cancel.child();
        let injector = Arc::clone(&self.injector);
        let target = self.config.target.clone();
        let signal = injection_cancel.clone();
        let mut injection = tokio::spawn(async move { injector.inject(target, signal).await });
        let mut finished: Option<InjectionResult> = None;

        let deadline = Instant::now() + self.config.injection_duration;
        loop {
            tokio::select! {
                joined = &mut injection, if finished.is_none() => {
                    finished = Some(joined.map_err(|e| {
                        ApplicationError::Internal(format!("injection task failed: {e}"))
                    })?);
                },
                next = self.next_snapshot(snapshots, deadline) => {
                    let snapshot = match next {
                        Ok(Some(snapshot)) => snapshot,
                        Ok(None) => break,
                        Err(e) => {
                            injection_cancel.cancel();
                            if finished.is_none() {
                                if let Ok(outcome) = injection.await {
                                    self.record_injection(outcome);
                                }
                            }
                            return Err(e);
                        },
                    };
                    let breached = self.config.breaches_rollback(
                        snapshot.application.error_rate,
                        snapshot.application.availability,
                        snapshot.impact_score,
                    );
                    let (error_rate, availability) =
                        (snapshot.application.error_rate, snapshot.application.availability);
                    self.record(snapshot);
                    if breached {
                        warn!(
                            error_rate,
                            availability,
                            threshold = self.config.safety.rollback_threshold,
                            "Safety threshold breached, aborting injection"
                        );
                        self.update(ExperimentResult::require_rollback)?;
                        injection_cancel.cancel();
                        self.invoke_rollback().await;
                        break;
                    }
                },
            }
        }

        let outcome = match finished {
            Some(outcome) => outcome,
            // Ends on its own or through the cancelled signal
            None => injection
                .await
                .map_err(|e| ApplicationError::Internal(format!("injection task failed: {e}")))?,
        };
        self.record_injection(outcome);

        if self.cancel.is_cancelled() {
            return Err(ApplicationError::Cancelled);
        }
        Ok(())
    }

    fn record_injection(&self, outcome: InjectionResult) {
        info!(
            success = outcome.success,
            skipped = outcome.skipped,
            interrupted = outcome.interrupted,
            impact = outcome.impact_score,
            "Injection finished"
        );
        let mut result = self.result.lock();
        if outcome.skipped {
            result.add_issue(format!("Fault injection skipped: {}", outcome.message));
        } else if !outcome.success {
            let cause = outcome.error.as_deref().unwrap_or(&outcome.message);
            result.add_issue(format!("Fault injection failed: {cause}"));
        }
        if outcome.recovery_successful == Some(false) {
            result.add_issue("Fault auto-recovery reported failure");
        }
        result.injection = Some(outcome);
    }

    async fn observation(
        &self,
        snapshots: &mut broadcast::Receiver<MetricSnapshot>,
    ) -> Result<(), ApplicationError> {
        let deadline = Instant::now() + self.config.observation_duration;
        while let Some(snapshot) = self.next_snapshot(snapshots, deadline).await? {
            self.record(snapshot);
        }
        Ok(())
    }

    async fn recovery(
        &self,
        snapshots: &mut broadcast::Receiver<MetricSnapshot>,
    ) -> Result<(), ApplicationError> {
        if !self.injector.recover().await {
            warn!("Fault recovery routine reported failure");
            self.result
                .lock()
                .add_issue("Fault recovery routine reported failure");
        }

        let baseline = self.result.lock().baseline.clone();
        let tolerance = self.config.safety.recovery_tolerance;
        let started = Instant::now();
        let deadline = started + self.config.safety.recovery_timeout;

        let mut recovery_time = None;
        if let Some(baseline) = baseline {
            while let Some(snapshot) = self.next_snapshot(snapshots, deadline).await? {
                let recovered = snapshot.within_tolerance_of(&baseline, tolerance);
                self.record(snapshot);
                if recovered {
                    recovery_time = Some(started.elapsed());
                    break;
                }
            }
        }
        self.monitor.stop().await;
        self.monitor.set_recovery_time(recovery_time);

        let mut result = self.result.lock();
        result.recovery_time = recovery_time;
        match recovery_time {
            Some(elapsed) => info!(recovery_ms = elapsed.as_millis(), "Metrics back within tolerance"),
            None => {
                warn!("Metrics did not return to baseline before the recovery timeout");
                result.add_issue(
                    "Metrics did not return within tolerance of the baseline before the recovery timeout",
                );
            },
        }
        Ok(())
    }

    fn analysis(&self) {
        let mut result = self.result.lock();
        let analysis = ImpactAnalysis::compute(
            &result.run_id,
            &result.metrics_collected,
            result.baseline.as_ref(),
            result.recovery_time,
            &self.config.alert_thresholds,
        );

        let mut recommendations = analysis
            .as_ref()
            .map(|a| a.recommendations.clone())
            .unwrap_or_default();
        if result.rollback_required {
            recommendations.push(
                "Safety rollback triggered: reduce fault severity or blast radius before re-running".to_string(),
            );
        }
        if result.recovery_time.is_none() {
            recommendations.push(
                "System did not recover to baseline: review recovery automation and self-healing".to_string(),
            );
        }

        let validated = !result.rollback_required;
        if let Some(analysis) = &analysis {
            info!(
                impact_level = %analysis.impact_level,
                samples = analysis.sample_count,
                hypothesis_validated = validated,
                "Impact analysis complete"
            );
        }
        result.impact_analysis = analysis;
        result.recommendations = recommendations;
        result.hypothesis_validated = Some(validated);
    }

    /// Wait for the next snapshot, the phase deadline or cancellation
    async fn next_snapshot(
        &self,
        snapshots: &mut broadcast::Receiver<MetricSnapshot>,
        deadline: Instant,
    ) -> Result<Option<MetricSnapshot>, ApplicationError> {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ApplicationError::Cancelled),
                () = sleep_until(deadline) => return Ok(None),
                received = snapshots.recv() => match received {
                    Ok(snapshot) => return Ok(Some(snapshot)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Execution fell behind the sampling loop");
                    },
                    Err(RecvError::Closed) => {
                        return Err(ApplicationError::Sampling("snapshot stream closed".to_string()));
                    },
                },
            }
        }
    }

    fn record(&self, snapshot: MetricSnapshot) {
        self.result.lock().record_snapshot(snapshot);
    }

    /// Invoke the rollback handler at most once per run
    async fn invoke_rollback(&self) {
        if self.rollback_invoked.swap(true, Ordering::SeqCst) {
            return;
        }
        let run_id = self.run_id();
        let outcome = self
            .rollbacks
            .invoke(&self.config.fault_type, &run_id)
            .await;

        let mut result = self.result.lock();
        let succeeded = outcome.unwrap_or_else(|| {
            result.add_issue(format!(
                "No rollback handler registered for {}",
                self.config.fault_type
            ));
            false
        });
        if let Err(e) = result.record_rollback_outcome(succeeded) {
            warn!(error = %e, "Rollback outcome not recorded");
        }
    }

    async fn cleanup(&self) {
        self.monitor.stop().await;
        if self.injector.is_active() && !self.injector.recover().await {
            warn!("Fault recovery during cleanup reported failure");
        }
    }
}
