//! Fault gate
//!
//! The active-injection record for call-level faults. While a fault is armed,
//! instrumented code that routes its calls through [`FaultGate::wrap`] fails
//! with the matching [`InjectedError`]. Recovery and rollback disarm the gate.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use domain::FaultType;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Default hang time of an armed timeout fault
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Dependency category an instrumented call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    /// Remote service over the network
    Network,
    /// Database query
    Database,
    /// Cache lookup or write
    Cache,
    /// Local filesystem access
    Disk,
}

impl Dependency {
    /// Whether an armed `fault` degrades calls of this category
    pub fn affected_by(self, fault: &FaultType) -> bool {
        match fault {
            FaultType::Timeout | FaultType::Exception => true,
            FaultType::NetworkError => self == Self::Network,
            FaultType::DatabaseError => self == Self::Database,
            FaultType::CacheError => self == Self::Cache,
            FaultType::DiskError => self == Self::Disk,
            FaultType::MemoryLeak
            | FaultType::CpuSpike
            | FaultType::Random
            | FaultType::Custom(_) => false,
        }
    }
}

/// Error returned to instrumented code while a fault is armed
#[derive(Debug, Error)]
pub enum InjectedError {
    /// Raised exception
    #[error("Injected error: {0}")]
    Generic(String),

    /// Simulated disk failure
    #[error("Injected I/O error: {0}")]
    Io(#[from] io::Error),

    /// Simulated timeout
    #[error("Injected timeout after {0:?}")]
    Timeout(Duration),

    /// Simulated network failure
    #[error("Injected connection refused")]
    ConnectionRefused,

    /// Simulated database failure
    #[error("Injected database error: {0}")]
    Database(String),

    /// Simulated cache failure
    #[error("Injected cache error: {0}")]
    Cache(String),
}

impl InjectedError {
    /// Error an armed fault produces for a call
    pub fn from_fault(fault: &FaultType, armed: &ArmedFault) -> Self {
        match fault {
            FaultType::Timeout => Self::Timeout(armed.timeout),
            FaultType::NetworkError => Self::ConnectionRefused,
            FaultType::DatabaseError => Self::Database(armed.message.clone()),
            FaultType::CacheError => Self::Cache(armed.message.clone()),
            FaultType::DiskError => Self::Io(io::Error::other(armed.message.clone())),
            FaultType::Exception
            | FaultType::MemoryLeak
            | FaultType::CpuSpike
            | FaultType::Random
            | FaultType::Custom(_) => Self::Generic(armed.message.clone()),
        }
    }
}

/// Settings of one armed fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedFault {
    /// Message carried by the injected error
    pub message: String,
    /// How long an armed timeout hangs a call before failing it
    pub timeout: Duration,
    armed_at: Instant,
}

impl ArmedFault {
    /// Armed fault with the given error message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: DEFAULT_GATE_TIMEOUT,
            armed_at: Instant::now(),
        }
    }

    /// Set the hang time of a timeout fault
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Time since the fault was armed
    pub fn age(&self) -> Duration {
        self.armed_at.elapsed()
    }
}

/// Statistics about calls routed through the gate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    /// Total number of calls processed
    pub total_calls: u64,
    /// Number of calls that failed with an injected fault
    pub faults_injected: u64,
    /// Number of calls that passed through untouched
    pub calls_passed: u64,
    /// Number of error faults injected
    pub errors_injected: u64,
    /// Number of timeouts injected
    pub timeouts_injected: u64,
}

impl GateStats {
    /// Fraction of calls that were failed
    #[allow(clippy::cast_precision_loss)]
    pub fn actual_fault_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.faults_injected as f64 / self.total_calls as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_calls: AtomicU64,
    faults_injected: AtomicU64,
    errors_injected: AtomicU64,
    timeouts_injected: AtomicU64,
}

/// Shared record of armed call-level faults
#[derive(Debug, Default)]
pub struct FaultGate {
    armed: RwLock<HashMap<FaultType, ArmedFault>>,
    counters: Counters,
}

impl FaultGate {
    /// Create a gate with nothing armed
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a fault, replacing its previous settings
    pub fn arm(&self, fault: FaultType, settings: ArmedFault) {
        info!(fault_type = %fault, "Fault armed");
        self.armed.write().insert(fault, settings);
    }

    /// Disarm a fault; returns whether it was armed
    pub fn disarm(&self, fault: &FaultType) -> bool {
        let removed = self.armed.write().remove(fault).is_some();
        if removed {
            info!(fault_type = %fault, "Fault disarmed");
        }
        removed
    }

    /// Disarm every fault; returns how many were armed
    pub fn disarm_all(&self) -> usize {
        let mut armed = self.armed.write();
        let count = armed.len();
        armed.clear();
        if count > 0 {
            info!(count, "All faults disarmed");
        }
        count
    }

    /// Whether `fault` is currently armed
    pub fn is_armed(&self, fault: &FaultType) -> bool {
        self.armed.read().contains_key(fault)
    }

    /// Armed faults, sorted by name
    pub fn armed(&self) -> Vec<FaultType> {
        let mut faults: Vec<FaultType> = self.armed.read().keys().cloned().collect();
        faults.sort_by(|a, b| a.name().cmp(b.name()));
        faults
    }

    /// Whether any armed fault degrades calls of `dependency`
    pub fn affects(&self, dependency: Dependency) -> bool {
        self.armed
            .read()
            .keys()
            .any(|fault| dependency.affected_by(fault))
    }

    /// Check a call without running it
    ///
    /// Returns the fault that would fail the call, if any. Timeouts take
    /// precedence, then raised exceptions, then dependency-specific faults.
    pub fn check(&self, dependency: Dependency) -> Option<(FaultType, ArmedFault)> {
        let armed = self.armed.read();
        let precedence = [
            FaultType::Timeout,
            FaultType::Exception,
            FaultType::NetworkError,
            FaultType::DatabaseError,
            FaultType::CacheError,
            FaultType::DiskError,
        ];
        precedence.into_iter().find_map(|fault| {
            if !dependency.affected_by(&fault) {
                return None;
            }
            armed.get(&fault).map(|settings| (fault, settings.clone()))
        })
    }

    /// Run `operation` unless an armed fault fails the call first
    ///
    /// An armed timeout hangs the call for its timeout before failing it.
    pub async fn wrap<F, T, E>(&self, dependency: Dependency, operation: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<InjectedError>,
    {
        self.counters.total_calls.fetch_add(1, Ordering::Relaxed);
        let Some((fault, settings)) = self.check(dependency) else {
            return operation.await;
        };

        self.counters.faults_injected.fetch_add(1, Ordering::Relaxed);
        debug!(fault_type = %fault, ?dependency, "Failing call with injected fault");
        if fault == FaultType::Timeout {
            self.counters.timeouts_injected.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(settings.timeout).await;
        } else {
            self.counters.errors_injected.fetch_add(1, Ordering::Relaxed);
        }
        Err(InjectedError::from_fault(&fault, &settings).into())
    }

    /// Current statistics
    pub fn stats(&self) -> GateStats {
        let total_calls = self.counters.total_calls.load(Ordering::Relaxed);
        let faults_injected = self.counters.faults_injected.load(Ordering::Relaxed);
        GateStats {
            total_calls,
            faults_injected,
            calls_passed: total_calls.saturating_sub(faults_injected),
            errors_injected: self.counters.errors_injected.load(Ordering::Relaxed),
            timeouts_injected: self.counters.timeouts_injected.load(Ordering::Relaxed),
        }
    }

    /// Reset the statistics, leaving armed faults in place
    pub fn reset_stats(&self) {
        self.counters.total_calls.store(0, Ordering::Relaxed);
        self.counters.faults_injected.store(0, Ordering::Relaxed);
        self.counters.errors_injected.store(0, Ordering::Relaxed);
        self.counters.timeouts_injected.store(0, Ordering::Relaxed);
    }
}
