//! Monitored metric dimensions

use std::fmt;

use serde::{Deserialize, Serialize};

/// A metric dimension that thresholds and alerts refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// CPU utilization fraction
    CpuUsage,
    /// Memory utilization fraction
    MemoryUsage,
    /// Disk utilization fraction
    DiskUsage,
    /// Error rate fraction
    ErrorRate,
    /// Response time in milliseconds
    ResponseTime,
    /// Availability fraction
    Availability,
}

impl MetricKind {
    /// All dimensions that carry an alert threshold
    pub const ALL: [Self; 6] = [
        Self::CpuUsage,
        Self::MemoryUsage,
        Self::DiskUsage,
        Self::ErrorRate,
        Self::ResponseTime,
        Self::Availability,
    ];

    /// Whether a lower reading is the bad direction
    pub const fn lower_is_worse(self) -> bool {
        matches!(self, Self::Availability)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CpuUsage => "cpu_usage",
            Self::MemoryUsage => "memory_usage",
            Self::DiskUsage => "disk_usage",
            Self::ErrorRate => "error_rate",
            Self::ResponseTime => "response_time",
            Self::Availability => "availability",
        };
        f.write_str(name)
    }
}
