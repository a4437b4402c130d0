//! Fault type definitions
//!
//! The closed set of failure modes an experiment can inject. Every consumer
//! dispatches with an exhaustive `match`, so adding a variant is a compile-time
//! checked change across the injector, the gate and the rollback table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of injected failure
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    /// Calls hang until a timeout elapses
    Timeout,
    /// Calls raise an error
    #[default]
    Exception,
    /// Memory grows without being released
    MemoryLeak,
    /// Sustained CPU-bound loop on background workers
    CpuSpike,
    /// Simulated network failure
    NetworkError,
    /// Simulated database failure
    DatabaseError,
    /// Simulated cache failure
    CacheError,
    /// Simulated disk failure
    DiskError,
    /// Randomly chosen composite of the built-in faults
    Random,
    /// Externally registered mechanism, looked up by name
    Custom(String),
}

impl FaultType {
    /// Built-in concrete mechanisms a `Random` composite may pick from
    pub const COMPOSABLE: [Self; 8] = [
        Self::Timeout,
        Self::Exception,
        Self::MemoryLeak,
        Self::CpuSpike,
        Self::NetworkError,
        Self::DatabaseError,
        Self::CacheError,
        Self::DiskError,
    ];

    /// Stable snake_case name used in logs, metrics labels and exports
    pub fn name(&self) -> &str {
        match self {
            Self::Timeout => "timeout",
            Self::Exception => "exception",
            Self::MemoryLeak => "memory_leak",
            Self::CpuSpike => "cpu_spike",
            Self::NetworkError => "network_error",
            Self::DatabaseError => "database_error",
            Self::CacheError => "cache_error",
            Self::DiskError => "disk_error",
            Self::Random => "random",
            Self::Custom(name) => name,
        }
    }

    /// Whether this fault degrades calls through the fault gate rather than
    /// consuming process resources
    pub const fn is_gated(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Exception
                | Self::NetworkError
                | Self::DatabaseError
                | Self::CacheError
                | Self::DiskError
        )
    }

    /// Whether this fault consumes process resources directly
    pub const fn is_resource_fault(&self) -> bool {
        matches!(self, Self::MemoryLeak | Self::CpuSpike)
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(name) => write!(f, "custom:{name}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Severity of an injected fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultSeverity {
    /// Barely noticeable degradation
    Low,
    /// Noticeable degradation (default)
    #[default]
    Medium,
    /// Severe degradation
    High,
    /// Outage-level fault
    Critical,
}

impl FaultSeverity {
    /// Base weight used by the injector impact score
    pub const fn base_weight(self) -> f64 {
        match self {
            Self::Low => 0.2,
            Self::Medium => 0.5,
            Self::High => 0.8,
            Self::Critical => 1.0,
        }
    }
}

impl fmt::Display for FaultSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}
