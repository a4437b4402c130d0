//! Metrics monitor
//!
//! Runs a periodic sampling loop over the system and application probes,
//! scores each reading, keeps a bounded history and raises threshold alerts.
//!
//! All mutable state (ring buffer, alert table, baseline, custom gauges) sits
//! behind one mutex. Snapshots are also broadcast to subscribers so that the
//! execution driving the run observes every tick as it happens. Raised alerts
//! are handed to the notification hub on a separate task; a slow channel never
//! holds up the next tick.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use domain::{
    Alert, AlertId, AlertRule, AlertSeverity, AlertThresholds, ApplicationMetrics, ImpactAnalysis,
    MetricSnapshot, RunId, SystemMetrics,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, trace, warn};

use crate::cancellation::CancelSignal;
use crate::error::ApplicationError;
use crate::ports::{ApplicationProbePort, SystemProbePort};
use crate::services::NotificationHub;

/// Default ring buffer capacity
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Capacity of the snapshot broadcast channel
const BROADCAST_CAPACITY: usize = 256;

const CSV_HEADER: &str = "timestamp,sequence,run_id,cpu_usage,memory_usage,disk_usage,network_usage,response_time_ms,error_rate,throughput_rps,availability,impact_score,baseline_deviation,substituted";

/// Snapshot export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Pretty-printed JSON array
    Json,
    /// Comma-separated values with a header row
    Csv,
}

#[derive(Debug, Default)]
struct MonitorState {
    buffer: VecDeque<MetricSnapshot>,
    alerts: Vec<Alert>,
    baseline: Option<MetricSnapshot>,
    recovery_time: Option<Duration>,
    custom: BTreeMap<String, f64>,
}

#[derive(Debug)]
struct Sampler {
    cancel: CancelSignal,
    handle: JoinHandle<()>,
}

/// Everything one sampling tick needs, shared with the loop task
#[derive(Clone)]
struct SamplingContext {
    system_probe: Arc<dyn SystemProbePort>,
    application_probe: Arc<dyn ApplicationProbePort>,
    hub: Option<Arc<NotificationHub>>,
    rules: Arc<Vec<AlertRule>>,
    capacity: usize,
    run_id: Option<RunId>,
    state: Arc<Mutex<MonitorState>>,
    sequence: Arc<AtomicU64>,
    snapshots: broadcast::Sender<MetricSnapshot>,
}

/// Periodic metric sampler with bounded history and threshold alerts
pub struct MetricsMonitor {
    ctx: SamplingContext,
    thresholds: AlertThresholds,
    sampler: Mutex<Option<Sampler>>,
}

impl std::fmt::Debug for MetricsMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsMonitor")
            .field("run_id", &self.ctx.run_id)
            .field("capacity", &self.ctx.capacity)
            .field("thresholds", &self.thresholds)
            .field("running", &self.is_running())
            .field("has_hub", &self.ctx.hub.is_some())
            .finish_non_exhaustive()
    }
}

impl MetricsMonitor {
    /// Create a monitor with default thresholds and capacity
    pub fn new(
        system_probe: Arc<dyn SystemProbePort>,
        application_probe: Arc<dyn ApplicationProbePort>,
    ) -> Self {
        let thresholds = AlertThresholds::default();
        let (snapshots, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            ctx: SamplingContext {
                system_probe,
                application_probe,
                hub: None,
                rules: Arc::new(AlertRule::from_thresholds(&thresholds, &[])),
                capacity: DEFAULT_BUFFER_CAPACITY,
                run_id: None,
                state: Arc::new(Mutex::new(MonitorState::default())),
                sequence: Arc::new(AtomicU64::new(0)),
                snapshots,
            },
            thresholds,
            sampler: Mutex::new(None),
        }
    }

    /// Set the ring buffer capacity (at least one entry)
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.ctx.capacity = capacity.max(1);
        self
    }

    /// Tag every snapshot with `run_id`
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.ctx.run_id = Some(run_id);
        self
    }

    /// Replace thresholds, keeping the configured alert channels
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        let channels = self
            .ctx
            .rules
            .first()
            .map(|r| r.channels.clone())
            .unwrap_or_default();
        self.ctx.rules = Arc::new(AlertRule::from_thresholds(&thresholds, &channels));
        self.thresholds = thresholds;
        self
    }

    /// Notification channels every alert rule delivers to
    #[must_use]
    pub fn with_alert_channels(mut self, channels: &[String]) -> Self {
        self.ctx.rules = Arc::new(AlertRule::from_thresholds(&self.thresholds, channels));
        self
    }

    /// Deliver raised alerts through `hub`
    #[must_use]
    pub fn with_hub(mut self, hub: Arc<NotificationHub>) -> Self {
        self.ctx.hub = Some(hub);
        self
    }

    /// Configured alert thresholds
    pub const fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Alert rules derived from the thresholds
    pub fn rules(&self) -> &[AlertRule] {
        &self.ctx.rules
    }

    /// Subscribe to snapshots produced by the sampling loop
    pub fn subscribe(&self) -> broadcast::Receiver<MetricSnapshot> {
        self.ctx.snapshots.subscribe()
    }

    /// Begin periodic sampling; no-op if already running
    ///
    /// The first tick fires immediately.
    #[instrument(skip(self), fields(run_id = ?self.ctx.run_id))]
    pub fn start(&self, interval: Duration) {
        let mut sampler = self.sampler.lock();
        if sampler.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            debug!("Sampling loop already running");
            return;
        }
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };
        let cancel = CancelSignal::new();
        let handle = tokio::spawn(sampling_loop(self.ctx.clone(), interval, cancel.clone()));
        info!(interval_ms = interval.as_millis(), "Sampling loop started");
        *sampler = Some(Sampler { cancel, handle });
    }

    /// Cancel the sampling loop and wait for it to quiesce
    pub async fn stop(&self) {
        let Some(sampler) = self.sampler.lock().take() else {
            return;
        };
        sampler.cancel.cancel();
        if let Err(e) = sampler.handle.await {
            warn!(error = %e, "Sampling loop ended abnormally");
        }
        info!(run_id = ?self.ctx.run_id, "Sampling loop stopped");
    }

    /// Whether the sampling loop is active
    pub fn is_running(&self) -> bool {
        self.sampler
            .lock()
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// Take one sample outside the loop
    ///
    /// The snapshot is retained and evaluated against the alert rules like a
    /// loop tick, but not broadcast to subscribers.
    pub async fn sample_now(&self) -> MetricSnapshot {
        let (snapshot, raised) = self.ctx.collect_and_record().await;
        self.ctx.dispatch(raised);
        snapshot
    }

    /// Sequence number the next collected sample will carry
    pub fn next_sequence(&self) -> u64 {
        self.ctx.sequence.load(Ordering::SeqCst)
    }

    /// Read both probes without recording anything
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::Sampling` if either probe fails.
    pub async fn probe_reading(&self) -> Result<MetricSnapshot, ApplicationError> {
        let custom = self.ctx.state.lock().custom.clone();
        let (system, application) = self.ctx.read_probes(&custom).await?;
        let baseline = self.ctx.state.lock().baseline.clone();
        Ok(MetricSnapshot::new(
            0,
            self.ctx.run_id.clone(),
            system,
            application,
            baseline.as_ref(),
        ))
    }

    /// Store the reference point for baseline deviation
    pub fn set_baseline(&self, snapshot: MetricSnapshot) {
        debug!(sequence = snapshot.sequence, "Baseline set");
        self.ctx.state.lock().baseline = Some(snapshot);
    }

    /// Current baseline, if any
    pub fn baseline(&self) -> Option<MetricSnapshot> {
        self.ctx.state.lock().baseline.clone()
    }

    /// Record the recovery time used by [`Self::impact_analysis`]
    pub fn set_recovery_time(&self, recovery_time: Option<Duration>) {
        self.ctx.state.lock().recovery_time = recovery_time;
    }

    /// Set a caller-supplied gauge passed to the application probe
    pub fn set_custom_metric(&self, name: impl Into<String>, value: f64) {
        self.ctx.state.lock().custom.insert(name.into(), value);
    }

    /// Retained snapshots in chronological order
    ///
    /// With `limit`, only the most recent `limit` entries are returned.
    pub fn metrics(&self, limit: Option<usize>) -> Vec<MetricSnapshot> {
        let state = self.ctx.state.lock();
        let skip = limit.map_or(0, |limit| state.buffer.len().saturating_sub(limit));
        state.buffer.iter().skip(skip).cloned().collect()
    }

    /// Most recent snapshot
    pub fn latest(&self) -> Option<MetricSnapshot> {
        self.ctx.state.lock().buffer.back().cloned()
    }

    /// Alerts, optionally filtered by severity and resolution
    pub fn alerts(
        &self,
        severity: Option<AlertSeverity>,
        resolved: Option<bool>,
    ) -> Vec<Alert> {
        self.ctx
            .state
            .lock()
            .alerts
            .iter()
            .filter(|a| severity.is_none_or(|s| a.severity == s))
            .filter(|a| resolved.is_none_or(|r| a.is_unresolved() != r))
            .cloned()
            .collect()
    }

    /// Resolve an alert; `false` if unknown or already resolved
    pub fn resolve_alert(&self, id: &AlertId) -> bool {
        let mut state = self.ctx.state.lock();
        let resolved = state
            .alerts
            .iter_mut()
            .find(|a| a.id == *id)
            .is_some_and(Alert::resolve);
        if resolved {
            info!(alert_id = %id, "Alert resolved");
        }
        resolved
    }

    /// Acknowledge an active alert; `false` if unknown or not active
    pub fn acknowledge_alert(&self, id: &AlertId) -> bool {
        let mut state = self.ctx.state.lock();
        state
            .alerts
            .iter_mut()
            .find(|a| a.id == *id)
            .is_some_and(Alert::acknowledge)
    }

    /// Impact analysis over the retained snapshots of `run_id`
    ///
    /// `None` if no retained snapshot belongs to the run.
    pub fn impact_analysis(&self, run_id: &RunId) -> Option<ImpactAnalysis> {
        let state = self.ctx.state.lock();
        let snapshots: Vec<MetricSnapshot> = state.buffer.iter().cloned().collect();
        ImpactAnalysis::compute(
            run_id,
            &snapshots,
            state.baseline.as_ref(),
            state.recovery_time,
            &self.thresholds,
        )
    }

    /// Machine-readable dump of the retained snapshots
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::Internal` if JSON serialization fails.
    pub fn export(&self, format: ExportFormat) -> Result<String, ApplicationError> {
        let snapshots = self.metrics(None);
        match format {
            ExportFormat::Json => serde_json::to_string_pretty(&snapshots)
                .map_err(|e| ApplicationError::Internal(format!("snapshot export failed: {e}"))),
            ExportFormat::Csv => {
                let mut out = String::from(CSV_HEADER);
                out.push('\n');
                for s in &snapshots {
                    let _ = writeln!(
                        out,
                        "{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
                        s.timestamp.to_rfc3339(),
                        s.sequence,
                        s.run_id.as_ref().map_or("", RunId::as_str),
                        s.system.cpu_usage,
                        s.system.memory_usage,
                        s.system.disk_usage,
                        s.system.network_usage,
                        s.application.response_time_ms,
                        s.application.error_rate,
                        s.application.throughput_rps,
                        s.application.availability,
                        s.impact_score,
                        s.baseline_deviation,
                        s.substituted,
                    );
                }
                Ok(out)
            },
        }
    }
}

impl Drop for MetricsMonitor {
    fn drop(&mut self) {
        if let Some(sampler) = self.sampler.get_mut().take() {
            sampler.cancel.cancel();
        }
    }
}

impl SamplingContext {
    async fn read_probes(
        &self,
        custom: &BTreeMap<String, f64>,
    ) -> Result<(SystemMetrics, ApplicationMetrics), ApplicationError> {
        let system = self.system_probe.collect().await?;
        let application = self.application_probe.collect(custom).await?;
        Ok((system, application))
    }

    /// Collect one reading, retain it and evaluate alert rules
    ///
    /// A probe failure is replaced by a neutral snapshot.
    /// The sequence number is taken before the probes are read.
    async fn collect_and_record(&self) -> (MetricSnapshot, Vec<(Alert, AlertRule)>) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let custom = self.state.lock().custom.clone();
        let reading = self.read_probes(&custom).await;
        self.record(sequence, reading)
    }

    fn record(
        &self,
        sequence: u64,
        reading: Result<(SystemMetrics, ApplicationMetrics), ApplicationError>,
    ) -> (MetricSnapshot, Vec<(Alert, AlertRule)>) {
        let mut state = self.state.lock();
        let snapshot = match reading {
            Ok((system, application)) => MetricSnapshot::new(
                sequence,
                self.run_id.clone(),
                system,
                application,
                state.baseline.as_ref(),
            ),
            Err(e) => {
                warn!(run_id = ?self.run_id, sequence, error = %e, "Metric collection failed, substituting neutral sample");
                MetricSnapshot::neutral(sequence, self.run_id.clone())
            },
        };

        if state.buffer.len() >= self.capacity {
            state.buffer.pop_front();
        }
        state.buffer.push_back(snapshot.clone());

        let mut raised = Vec::new();
        for rule in self.rules.iter() {
            let value = snapshot.value_of(rule.metric);
            let Some(severity) = rule.evaluate(value) else {
                continue;
            };
            let already_open = state
                .alerts
                .iter()
                .any(|a| a.metric == rule.metric && a.is_unresolved());
            if already_open {
                continue;
            }
            let alert = Alert::raise(rule, severity, value, self.run_id.clone());
            warn!(
                run_id = ?self.run_id,
                metric = %rule.metric,
                severity = %severity,
                value,
                threshold = rule.threshold,
                "Alert raised"
            );
            state.alerts.push(alert.clone());
            raised.push((alert, rule.clone()));
        }
        drop(state);

        trace!(
            sequence,
            impact = snapshot.impact_score,
            deviation = snapshot.baseline_deviation,
            "Sample recorded"
        );
        (snapshot, raised)
    }

    /// Hand raised alerts to the hub without waiting for delivery
    fn dispatch(&self, raised: Vec<(Alert, AlertRule)>) {
        let Some(hub) = &self.hub else {
            return;
        };
        if raised.is_empty() {
            return;
        }
        let hub = Arc::clone(hub);
        tokio::spawn(async move {
            for (alert, rule) in raised {
                hub.notify_alert(&alert, &rule).await;
            }
        });
    }

    async fn tick(&self) {
        let (snapshot, raised) = self.collect_and_record().await;
        // No subscribers is fine
        let _ = self.snapshots.send(snapshot);
        self.dispatch(raised);
    }
}

async fn sampling_loop(ctx: SamplingContext, interval: Duration, cancel: CancelSignal) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => ctx.tick().await,
        }
    }
    debug!(run_id = ?ctx.run_id, "Sampling loop exited");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use domain::{ExperimentResult, MetricKind};
    use proptest::prelude::*;

    use super::*;
    use crate::ports::{MockApplicationProbePort, MockSystemProbePort, NotifierPort};

    fn system_probe(cpu: f64) -> Arc<dyn SystemProbePort> {
        let mut probe = MockSystemProbePort::new();
        probe.expect_collect().returning(move || {
            Ok(SystemMetrics {
                cpu_usage: cpu,
                memory_usage: 0.3,
                disk_usage: 0.2,
                network_usage: 0.1,
            })
        });
        Arc::new(probe)
    }

    fn healthy_app_probe() -> Arc<dyn ApplicationProbePort> {
        let mut probe = MockApplicationProbePort::new();
        probe.expect_collect().returning(|custom| {
            Ok(ApplicationMetrics {
                response_time_ms: 80.0,
                error_rate: 0.01,
                throughput_rps: 200.0,
                availability: 0.999,
                custom: custom.clone(),
            })
        });
        Arc::new(probe)
    }

    fn failing_system_probe() -> Arc<dyn SystemProbePort> {
        let mut probe = MockSystemProbePort::new();
        probe
            .expect_collect()
            .returning(|| Err(ApplicationError::Sampling("probe offline".to_string())));
        Arc::new(probe)
    }

    fn monitor(cpu: f64) -> MetricsMonitor {
        MetricsMonitor::new(system_probe(cpu), healthy_app_probe())
            .with_run_id(RunId::from("run-1"))
    }

    #[tokio::test]
    async fn cpu_breach_raises_exactly_one_alert() {
        let monitor = monitor(0.95);
        for _ in 0..5 {
            monitor.sample_now().await;
        }

        let open = monitor.alerts(None, Some(false));
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].metric, MetricKind::CpuUsage);
        assert_eq!(open[0].severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn resolved_alert_allows_a_new_one() {
        let monitor = monitor(0.95);
        monitor.sample_now().await;
        let id = monitor.alerts(None, None)[0].id;

        assert!(monitor.resolve_alert(&id));
        assert!(!monitor.resolve_alert(&id));
        assert!(!monitor.resolve_alert(&AlertId::new()));

        monitor.sample_now().await;
        assert_eq!(monitor.alerts(None, Some(true)).len(), 1);
        assert_eq!(monitor.alerts(None, Some(false)).len(), 1);
    }

    #[tokio::test]
    async fn acknowledged_alert_stays_open() {
        let monitor = monitor(0.95);
        monitor.sample_now().await;
        let id = monitor.alerts(None, None)[0].id;

        assert!(monitor.acknowledge_alert(&id));
        assert!(!monitor.acknowledge_alert(&id));
        monitor.sample_now().await;
        assert_eq!(monitor.alerts(None, Some(false)).len(), 1);
    }

    #[tokio::test]
    async fn severity_filter_applies() {
        let monitor = monitor(0.82);
        monitor.sample_now().await;
        assert_eq!(monitor.alerts(Some(AlertSeverity::Warning), None).len(), 1);
        assert!(monitor.alerts(Some(AlertSeverity::Critical), None).is_empty());
    }

    #[tokio::test]
    async fn ring_buffer_evicts_oldest() {
        let monitor = monitor(0.1).with_capacity(3);
        for _ in 0..7 {
            monitor.sample_now().await;
        }

        let retained = monitor.metrics(None);
        let sequences: Vec<u64> = retained.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![4, 5, 6]);

        let recent = monitor.metrics(Some(2));
        assert_eq!(recent.iter().map(|s| s.sequence).collect::<Vec<_>>(), vec![5, 6]);
    }

    #[tokio::test]
    async fn sequence_is_reserved_per_sample() {
        let monitor = monitor(0.1);
        assert_eq!(monitor.next_sequence(), 0);
        let first = monitor.sample_now().await;
        let second = monitor.sample_now().await;
        assert_eq!((first.sequence, second.sequence), (0, 1));
        assert_eq!(monitor.next_sequence(), 2);
    }

    #[tokio::test]
    async fn probe_failure_substitutes_neutral_sample() {
        let monitor = MetricsMonitor::new(failing_system_probe(), healthy_app_probe());
        let snapshot = monitor.sample_now().await;
        assert!(snapshot.substituted);
        assert!(monitor.alerts(None, None).is_empty());
        assert!(monitor.probe_reading().await.is_err());
    }

    #[tokio::test]
    async fn baseline_drives_deviation() {
        let monitor = monitor(0.1);
        let first = monitor.sample_now().await;
        assert!(first.baseline_deviation.abs() < f64::EPSILON);

        let mut shifted = first.clone();
        shifted.system.cpu_usage = 0.8;
        monitor.set_baseline(shifted);
        let second = monitor.sample_now().await;
        assert!(second.baseline_deviation > 0.0);
    }

    #[tokio::test]
    async fn custom_gauges_reach_the_probe() {
        let monitor = monitor(0.1);
        monitor.set_custom_metric("queue_depth", 7.0);
        let snapshot = monitor.sample_now().await;
        assert_eq!(snapshot.application.custom.get("queue_depth"), Some(&7.0));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_samples_each_interval_and_stops() {
        let monitor = monitor(0.1);
        let mut rx = monitor.subscribe();
        monitor.start(Duration::from_secs(1));
        monitor.start(Duration::from_secs(1));
        assert!(monitor.is_running());

        for expected in 0..3 {
            let snapshot = rx.recv().await.unwrap();
            assert_eq!(snapshot.sequence, expected);
        }

        monitor.stop().await;
        assert!(!monitor.is_running());
        let count = monitor.metrics(None).len();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(monitor.metrics(None).len(), count);
    }

    #[tokio::test]
    async fn impact_analysis_requires_samples() {
        let monitor = monitor(0.1);
        assert!(monitor.impact_analysis(&RunId::from("run-1")).is_none());
        monitor.sample_now().await;
        monitor.sample_now().await;
        let analysis = monitor.impact_analysis(&RunId::from("run-1")).unwrap();
        assert_eq!(analysis.sample_count, 2);
        assert!(monitor.impact_analysis(&RunId::from("other")).is_none());
    }

    #[tokio::test]
    async fn exports_json_and_csv() {
        let monitor = monitor(0.1);
        monitor.sample_now().await;
        monitor.sample_now().await;

        let json = monitor.export(ExportFormat::Json).unwrap();
        let parsed: Vec<MetricSnapshot> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);

        let csv = monitor.export(ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].contains(",run-1,"));
    }

    fn degraded_app_probe() -> Arc<dyn ApplicationProbePort> {
        let mut probe = MockApplicationProbePort::new();
        probe.expect_collect().returning(|custom| {
            Ok(ApplicationMetrics {
                response_time_ms: 900.0,
                error_rate: 0.3,
                throughput_rps: 20.0,
                availability: 0.5,
                custom: custom.clone(),
            })
        });
        Arc::new(probe)
    }

    /// Notifier that hangs far beyond the hub timeout
    #[derive(Debug, Default)]
    struct StuckNotifier {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl NotifierPort for StuckNotifier {
        async fn notify_alert(&self, _: &Alert, _: &AlertRule) -> Result<(), ApplicationError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn notify_result(&self, _: &ExperimentResult) -> Result<(), ApplicationError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_notifier_does_not_delay_sampling() {
        let notifier = Arc::new(StuckNotifier::default());
        let hub = Arc::new(NotificationHub::default());
        hub.register("pager", Arc::clone(&notifier) as _);
        hub.init();

        let monitor = MetricsMonitor::new(system_probe(0.95), degraded_app_probe())
            .with_alert_channels(&["pager".to_string()])
            .with_hub(hub);
        monitor.start(Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let sampled = monitor.metrics(None).len();
        assert!(sampled >= 10, "only {sampled} samples in 10s");

        monitor.stop().await;
        let raised = monitor.alerts(None, None).len();
        assert!(raised >= 3);

        // Each delivery is cut off by the hub timeout
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(notifier.attempts.load(Ordering::SeqCst), raised);
    }

    proptest! {
        #[test]
        fn ring_buffer_keeps_the_newest_capacity_samples(
            capacity in 1usize..32,
            extra in 1usize..32,
        ) {
            let total = capacity + extra;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let retained = runtime.block_on(async {
                let monitor = monitor(0.1).with_capacity(capacity);
                for _ in 0..total {
                    monitor.sample_now().await;
                }
                monitor.metrics(None)
            });

            prop_assert_eq!(retained.len(), capacity);
            prop_assert!(retained.windows(2).all(|w| w[0].sequence < w[1].sequence));
            prop_assert_eq!(retained.last().map(|s| s.sequence), Some(total as u64 - 1));
            prop_assert_eq!(retained[0].sequence, (total - capacity) as u64);
        }
    }
}
