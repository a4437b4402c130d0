//! Fault injector
//!
//! Executes one configured failure mode per `inject` call: decides whether to
//! proceed, applies the optional delay, starts the concrete mechanism(s),
//! holds them for the configured duration and, unless auto-recovery is
//! disabled, releases them again.

use std::sync::Arc;
use std::time::Duration;

use application::{CancelSignal, FaultInjectionPort, SystemProbePort};
use async_trait::async_trait;
use chrono::Utc;
use domain::{ConditionalRule, FailureConfig, FaultType, InjectionMode, InjectionResult, ResourceKind};
use metrics::counter;
use parking_lot::Mutex;
use rand::Rng;
use rand::seq::IteratorRandom;
use tracing::{debug, info, instrument, warn};

use super::{
    ArmedFault, CpuSpike, CustomFaultMechanism, DEFAULT_GATE_TIMEOUT, FaultGate, LEAK_CHUNK_BYTES,
    MemoryLeak, ResourcePressure,
};

const DEFAULT_MEMORY_LIMIT_MB: f64 = 64.0;
const DEFAULT_MEMORY_GROWTH_MB: f64 = 8.0;
const DEFAULT_CPU_WORKERS: f64 = 1.0;
const DEFAULT_RANDOM_FAULTS: f64 = 2.0;
const LEAK_STEP: Duration = Duration::from_secs(1);

/// Everything an applied fault still holds
#[derive(Debug, Default)]
struct ActiveInjection {
    gated: Vec<FaultType>,
    leak: Option<MemoryLeak>,
    cpu: Option<CpuSpike>,
    custom: Option<Arc<dyn CustomFaultMechanism>>,
}

/// Injector for the built-in fault mechanisms and registered custom ones
pub struct ChaosFaultInjector {
    config: FailureConfig,
    gate: Arc<FaultGate>,
    pressure: Arc<ResourcePressure>,
    system_probe: Option<Arc<dyn SystemProbePort>>,
    custom: Option<Arc<dyn CustomFaultMechanism>>,
    active: Mutex<Option<ActiveInjection>>,
}

impl std::fmt::Debug for ChaosFaultInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosFaultInjector")
            .field("config", &self.config)
            .field("active", &self.is_active())
            .field("system_probe", &self.system_probe.is_some())
            .finish_non_exhaustive()
    }
}

impl ChaosFaultInjector {
    /// Create an injector for `config`
    pub fn new(config: FailureConfig, gate: Arc<FaultGate>, pressure: Arc<ResourcePressure>) -> Self {
        Self {
            config,
            gate,
            pressure,
            system_probe: None,
            custom: None,
            active: Mutex::new(None),
        }
    }

    /// Probe used by resource conditions
    #[must_use]
    pub fn with_system_probe(mut self, probe: Arc<dyn SystemProbePort>) -> Self {
        self.system_probe = Some(probe);
        self
    }

    /// Mechanism run for a custom fault
    #[must_use]
    pub fn with_custom(mut self, mechanism: Arc<dyn CustomFaultMechanism>) -> Self {
        self.custom = Some(mechanism);
        self
    }

    /// Configuration this injector runs
    pub const fn config(&self) -> &FailureConfig {
        &self.config
    }

    /// Decide whether this call proceeds; `Err` carries the skip reason
    async fn decide(&self) -> Result<(), String> {
        match self.config.mode {
            InjectionMode::Immediate => Ok(()),
            InjectionMode::Probabilistic => {
                let roll: f64 = rand::rng().random();
                if roll < self.config.probability {
                    Ok(())
                } else {
                    Err(format!(
                        "probability gate declined (p={:.2})",
                        self.config.probability
                    ))
                }
            },
            InjectionMode::Conditional => self.evaluate_conditions().await,
        }
    }

    async fn evaluate_conditions(&self) -> Result<(), String> {
        let now = Utc::now();
        let mut reading = None;
        for rule in &self.config.conditions {
            match rule {
                ConditionalRule::TimeWindow { start_hour, end_hour } => {
                    if !rule.time_allows(now) {
                        return Err(format!(
                            "outside time window {start_hour:02}:00-{end_hour:02}:00 UTC"
                        ));
                    }
                },
                ConditionalRule::ResourceBelow { resource, max } => {
                    if reading.is_none() {
                        let Some(probe) = &self.system_probe else {
                            return Err("no system probe for resource condition".to_string());
                        };
                        reading = Some(
                            probe
                                .collect()
                                .await
                                .map_err(|e| format!("resource condition unreadable: {e}"))?,
                        );
                    }
                    let Some(system) = &reading else {
                        return Err("resource condition unreadable".to_string());
                    };
                    let value = match resource {
                        ResourceKind::Cpu => system.cpu_usage,
                        ResourceKind::Memory => system.memory_usage,
                        ResourceKind::Disk => system.disk_usage,
                        ResourceKind::Network => system.network_usage,
                    };
                    if value >= *max {
                        return Err(format!("{resource:?} at {value:.2} is not below {max:.2}"));
                    }
                },
            }
        }
        Ok(())
    }

    /// Concrete mechanisms for the configured fault
    fn mechanisms(&self) -> Vec<FaultType> {
        if self.config.fault_type != FaultType::Random {
            return vec![self.config.fault_type.clone()];
        }
        let wanted = self
            .config
            .number_param("random_faults")
            .unwrap_or(DEFAULT_RANDOM_FAULTS)
            .clamp(1.0, FaultType::COMPOSABLE.len() as f64);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let wanted = wanted as usize;
        FaultType::COMPOSABLE
            .into_iter()
            .choose_multiple(&mut rand::rng(), wanted)
    }

    fn error_message(&self, fault: &FaultType) -> String {
        self.config
            .str_param("message")
            .map_or_else(|| format!("injected {fault}"), ToString::to_string)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn mb_param(&self, key: &str, default_mb: f64) -> usize {
        let mb = self.config.number_param(key).unwrap_or(default_mb).max(0.0);
        (mb * LEAK_CHUNK_BYTES as f64) as usize
    }

    /// Start one concrete mechanism and record what it holds
    async fn apply(
        &self,
        fault: &FaultType,
        target: Option<String>,
        cancel: &CancelSignal,
        active: &mut ActiveInjection,
    ) -> Result<(), String> {
        match fault {
            FaultType::Timeout
            | FaultType::Exception
            | FaultType::NetworkError
            | FaultType::DatabaseError
            | FaultType::CacheError
            | FaultType::DiskError => {
                let timeout = self
                    .config
                    .number_param("timeout_ms")
                    .filter(|ms| *ms > 0.0)
                    .map_or(DEFAULT_GATE_TIMEOUT, |ms| Duration::from_secs_f64(ms / 1000.0));
                self.gate.arm(
                    fault.clone(),
                    ArmedFault::new(self.error_message(fault)).with_timeout(timeout),
                );
                active.gated.push(fault.clone());
            },
            FaultType::MemoryLeak => {
                let limit = self.mb_param("memory_limit_mb", DEFAULT_MEMORY_LIMIT_MB);
                active.leak = Some(MemoryLeak::new(limit, Arc::clone(&self.pressure)));
            },
            FaultType::CpuSpike => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let workers = self
                    .config
                    .number_param("cpu_workers")
                    .unwrap_or(DEFAULT_CPU_WORKERS)
                    .max(1.0) as usize;
                let intensity = self.config.number_param("cpu_intensity").unwrap_or(1.0);
                active.cpu = Some(CpuSpike::start(
                    workers,
                    intensity,
                    cancel.clone(),
                    &self.pressure,
                ));
            },
            FaultType::Custom(name) => {
                let Some(mechanism) = &self.custom else {
                    return Err(format!("no mechanism registered for custom fault {name}"));
                };
                mechanism.apply(&self.config, target).await?;
                active.custom = Some(Arc::clone(mechanism));
            },
            FaultType::Random => {
                return Err("random is not a concrete mechanism".to_string());
            },
        }
        debug!(fault_type = %fault, "Mechanism applied");
        Ok(())
    }

    /// Keep the fault in place for the configured duration
    ///
    /// Returns `false` if `cancel` cut the hold short.
    async fn hold(&self, cancel: &CancelSignal) -> bool {
        let leaking = self
            .active
            .lock()
            .as_ref()
            .is_some_and(|active| active.leak.is_some());
        if !leaking {
            return cancel.sleep(self.config.duration).await;
        }

        let growth = self.mb_param("memory_growth_mb", DEFAULT_MEMORY_GROWTH_MB);
        let deadline = tokio::time::Instant::now() + self.config.duration;
        loop {
            if let Some(leak) = self.active.lock().as_mut().and_then(|a| a.leak.as_mut()) {
                leak.grow(growth);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return true;
            }
            if !cancel.sleep(remaining.min(LEAK_STEP)).await {
                return false;
            }
        }
    }

    fn outcome(
        &self,
        mechanisms: Vec<FaultType>,
        target: Option<String>,
        started_at: chrono::DateTime<Utc>,
    ) -> InjectionResult {
        InjectionResult {
            fault_type: self.config.fault_type.clone(),
            mechanisms,
            success: false,
            skipped: false,
            message: String::new(),
            error: None,
            target,
            started_at,
            ended_at: Utc::now(),
            interrupted: false,
            impact_score: self.config.impact_score(),
            recovery_successful: None,
        }
    }
}

#[async_trait]
impl FaultInjectionPort for ChaosFaultInjector {
    fn fault_type(&self) -> FaultType {
        self.config.fault_type.clone()
    }

    #[instrument(skip(self, cancel), fields(fault_type = %self.config.fault_type))]
    async fn inject(&self, target: Option<String>, cancel: CancelSignal) -> InjectionResult {
        let started_at = Utc::now();
        let label = self.config.fault_type.name().to_string();
        counter!("chaos_injections_total", "fault_type" => label.clone()).increment(1);

        if let Err(reason) = self.decide().await {
            info!(reason = %reason, "Injection skipped");
            counter!("chaos_injections_skipped_total", "fault_type" => label).increment(1);
            let mut skipped = InjectionResult::skipped(self.config.fault_type.clone(), reason);
            skipped.target = target;
            return skipped;
        }

        if !self.config.delay.is_zero() && !cancel.sleep(self.config.delay).await {
            let mut skipped = InjectionResult::skipped(
                self.config.fault_type.clone(),
                "cancelled during injection delay",
            );
            skipped.target = target;
            skipped.interrupted = true;
            return skipped;
        }

        let mechanisms = self.mechanisms();
        let fault_cancel = cancel.child();
        let mut active = ActiveInjection::default();
        let mut failure = None;
        for mechanism in &mechanisms {
            if let Err(e) = self.apply(mechanism, target.clone(), &fault_cancel, &mut active).await {
                failure = Some(e);
                break;
            }
        }
        *self.active.lock() = Some(active);

        if let Some(error) = failure {
            warn!(error = %error, "Fault mechanism failed, recovering");
            counter!("chaos_injections_failed_total", "fault_type" => label).increment(1);
            let recovered = self.recover().await;
            let mut result = self.outcome(mechanisms, target, started_at);
            result.message = "fault mechanism failed".to_string();
            result.error = Some(error);
            result.recovery_successful = Some(recovered);
            return result;
        }

        info!(mechanisms = ?mechanisms, duration = ?self.config.duration, "Fault active");
        let completed = self.hold(&cancel).await;

        let recovery = if self.config.auto_recovery {
            Some(self.recover().await)
        } else {
            None
        };

        let mut result = self.outcome(mechanisms, target, started_at);
        result.success = true;
        result.interrupted = !completed;
        result.recovery_successful = recovery;
        result.message = if completed {
            format!("{} held for {:?}", self.config.fault_type, self.config.duration)
        } else {
            format!("{} interrupted by cancellation", self.config.fault_type)
        };
        result
    }

    async fn recover(&self) -> bool {
        let taken = self.active.lock().take();
        let Some(active) = taken else {
            return true;
        };

        for fault in &active.gated {
            self.gate.disarm(fault);
        }
        drop(active.leak);

        let mut recovered = true;
        if let Some(cpu) = active.cpu {
            recovered &= cpu.stop().await;
        }
        if let Some(mechanism) = active.custom {
            recovered &= mechanism.recover().await;
        }

        counter!(
            "chaos_recoveries_total",
            "fault_type" => self.config.fault_type.name().to_string(),
            "outcome" => if recovered { "ok" } else { "failed" }
        )
        .increment(1);
        info!(fault_type = %self.config.fault_type, recovered, "Fault recovered");
        recovered
    }

    fn impact_score(&self) -> f64 {
        self.config.impact_score()
    }

    fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use application::ApplicationError;
    use domain::{FaultSeverity, SystemMetrics};

    use super::*;
    use crate::chaos::{Dependency, MockCustomFaultMechanism};

    struct FixedProbe(SystemMetrics);

    #[async_trait]
    impl SystemProbePort for FixedProbe {
        async fn collect(&self) -> Result<SystemMetrics, ApplicationError> {
            Ok(self.0)
        }
    }

    fn injector(config: FailureConfig) -> (ChaosFaultInjector, Arc<FaultGate>, Arc<ResourcePressure>) {
        let gate = Arc::new(FaultGate::new());
        let pressure = Arc::new(ResourcePressure::new());
        (
            ChaosFaultInjector::new(config, Arc::clone(&gate), Arc::clone(&pressure)),
            gate,
            pressure,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_gated_fault_arms_then_recovers() {
        let (injector, gate, _) =
            injector(FailureConfig::new(FaultType::DatabaseError, Duration::from_secs(3)));

        let (result, ()) = tokio::join!(injector.inject(Some("orders-db".to_string()), CancelSignal::new()), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(gate.is_armed(&FaultType::DatabaseError));
            assert!(injector.is_active());
        });

        assert!(result.success);
        assert!(!result.skipped);
        assert!(!result.interrupted);
        assert_eq!(result.recovery_successful, Some(true));
        assert_eq!(result.target.as_deref(), Some("orders-db"));
        assert_eq!(result.mechanisms, vec![FaultType::DatabaseError]);
        assert!(!gate.is_armed(&FaultType::DatabaseError));
        assert!(!injector.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_full_probability_never_skips() {
        for _ in 0..20 {
            let (injector, _, _) = injector(
                FailureConfig::new(FaultType::Exception, Duration::from_millis(10))
                    .with_probability(1.0),
            );
            let result = injector.inject(None, CancelSignal::new()).await;
            assert!(!result.skipped);
            assert!(result.success || result.error.is_some());
        }
    }

    #[tokio::test]
    async fn zero_probability_skips_without_side_effects() {
        let (injector, gate, _) = injector(
            FailureConfig::new(FaultType::NetworkError, Duration::from_secs(1))
                .with_mode(InjectionMode::Probabilistic)
                .with_probability(0.0),
        );
        let result = injector.inject(None, CancelSignal::new()).await;
        assert!(result.skipped);
        assert!(!result.success);
        assert!(result.message.contains("probability"));
        assert!(gate.armed().is_empty());
        assert!(!injector.is_active());
    }

    #[tokio::test]
    async fn busy_resource_condition_skips() {
        let config = FailureConfig::new(FaultType::CacheError, Duration::from_secs(1))
            .with_mode(InjectionMode::Conditional)
            .with_condition(ConditionalRule::ResourceBelow {
                resource: ResourceKind::Cpu,
                max: 0.5,
            });
        let (injector, gate, _) = injector(config);
        let injector = injector.with_system_probe(Arc::new(FixedProbe(SystemMetrics {
            cpu_usage: 0.9,
            ..SystemMetrics::default()
        })));

        let result = injector.inject(None, CancelSignal::new()).await;
        assert!(result.skipped);
        assert!(result.message.contains("not below"));
        assert!(gate.armed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn passing_conditions_proceed() {
        let config = FailureConfig::new(FaultType::CacheError, Duration::from_millis(100))
            .with_mode(InjectionMode::Conditional)
            .with_condition(ConditionalRule::TimeWindow {
                start_hour: 0,
                end_hour: 0,
            })
            .with_condition(ConditionalRule::ResourceBelow {
                resource: ResourceKind::Memory,
                max: 0.8,
            });
        let (injector, _, _) = injector(config);
        let injector = injector.with_system_probe(Arc::new(FixedProbe(SystemMetrics::default())));

        let result = injector.inject(None, CancelSignal::new()).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn resource_condition_without_probe_skips() {
        let config = FailureConfig::new(FaultType::CacheError, Duration::from_secs(1))
            .with_mode(InjectionMode::Conditional)
            .with_condition(ConditionalRule::ResourceBelow {
                resource: ResourceKind::Disk,
                max: 0.9,
            });
        let (injector, _, _) = injector(config);
        assert!(injector.inject(None, CancelSignal::new()).await.skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_hold_and_recovers() {
        let (injector, gate, _) =
            injector(FailureConfig::new(FaultType::Timeout, Duration::from_secs(60)));
        let cancel = CancelSignal::new();

        let started = tokio::time::Instant::now();
        let (result, ()) = tokio::join!(injector.inject(None, cancel.clone()), async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            cancel.cancel();
        });

        assert!(result.success);
        assert!(result.interrupted);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(gate.armed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_delay_applies_nothing() {
        let (injector, gate, _) = injector(
            FailureConfig::new(FaultType::Exception, Duration::from_secs(5))
                .with_delay(Duration::from_secs(10)),
        );
        let cancel = CancelSignal::new();
        cancel.cancel();

        let result = injector.inject(None, cancel).await;
        assert!(result.skipped);
        assert!(result.interrupted);
        assert!(gate.armed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_auto_recovery_leaves_fault_active() {
        let (injector, gate, _) = injector(
            FailureConfig::new(FaultType::DiskError, Duration::from_millis(200))
                .with_auto_recovery(false),
        );
        let result = injector.inject(None, CancelSignal::new()).await;
        assert!(result.success);
        assert_eq!(result.recovery_successful, None);
        assert!(injector.is_active());
        assert!(gate.affects(Dependency::Disk));

        assert!(injector.recover().await);
        assert!(!injector.is_active());
        assert!(!gate.affects(Dependency::Disk));
    }

    #[tokio::test(start_paused = true)]
    async fn memory_leak_grows_then_releases() {
        let (injector, _, pressure) = injector(
            FailureConfig::new(FaultType::MemoryLeak, Duration::from_secs(3))
                .with_parameter("memory_limit_mb", serde_json::json!(4))
                .with_parameter("memory_growth_mb", serde_json::json!(1)),
        );

        let (result, ()) = tokio::join!(injector.inject(None, CancelSignal::new()), async {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            assert_eq!(pressure.retained_bytes(), 3 * LEAK_CHUNK_BYTES as u64);
        });

        assert!(result.success);
        assert_eq!(pressure.retained_bytes(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cpu_spike_stops_after_duration() {
        let (injector, _, pressure) = injector(
            FailureConfig::new(FaultType::CpuSpike, Duration::from_millis(100))
                .with_parameter("cpu_intensity", serde_json::json!(0.5)),
        );
        let result = injector.inject(None, CancelSignal::new()).await;
        assert!(result.success);
        assert_eq!(result.recovery_successful, Some(true));
        assert_eq!(pressure.busy_workers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn random_composes_distinct_mechanisms() {
        let (injector, _, _) = injector(
            FailureConfig::new(FaultType::Random, Duration::from_millis(10))
                .with_parameter("random_faults", serde_json::json!(3)),
        );
        let mechanisms = injector.mechanisms();
        assert_eq!(mechanisms.len(), 3);
        assert!(mechanisms.iter().all(|m| FaultType::COMPOSABLE.contains(m)));
        let mut names: Vec<&str> = mechanisms.iter().map(FaultType::name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_mechanism_failure_is_captured() {
        let recoveries = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&recoveries);
        let mut mechanism = MockCustomFaultMechanism::new();
        mechanism
            .expect_apply()
            .returning(|_, _| Err("iptables rejected rule".to_string()));
        mechanism.expect_recover().returning(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            true
        });

        let (injector, _, _) = injector(FailureConfig::new(
            FaultType::Custom("partition".to_string()),
            Duration::from_secs(5),
        ));
        let injector = injector.with_custom(Arc::new(mechanism));

        let result = injector.inject(None, CancelSignal::new()).await;
        assert!(!result.success);
        assert!(!result.skipped);
        assert_eq!(result.error.as_deref(), Some("iptables rejected rule"));
        assert_eq!(result.recovery_successful, Some(true));
        // The mechanism never applied, so it has nothing to recover
        assert_eq!(recoveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_mechanism_is_applied_and_recovered() {
        let mut mechanism = MockCustomFaultMechanism::new();
        mechanism.expect_apply().times(1).returning(|_, _| Ok(()));
        mechanism.expect_recover().times(1).returning(|| true);

        let (injector, _, _) = injector(FailureConfig::new(
            FaultType::Custom("partition".to_string()),
            Duration::from_secs(1),
        ));
        let injector = injector.with_custom(Arc::new(mechanism));

        let result = injector.inject(None, CancelSignal::new()).await;
        assert!(result.success);
        assert_eq!(result.recovery_successful, Some(true));
    }

    #[test]
    fn impact_score_follows_config() {
        let config = FailureConfig::new(FaultType::CpuSpike, Duration::from_secs(300))
            .with_severity(FaultSeverity::Critical)
            .with_probability(1.0);
        let (injector, _, _) = injector(config);
        assert!((injector.impact_score() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn recover_without_active_fault_is_a_noop() {
        let (injector, _, _) =
            injector(FailureConfig::new(FaultType::Exception, Duration::from_secs(1)));
        assert!(injector.recover().await);
    }
}
