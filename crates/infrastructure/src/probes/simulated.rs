//! Simulated metric probes

use std::collections::BTreeMap;
use std::sync::Arc;

use application::{ApplicationError, ApplicationProbePort, SystemProbePort};
use async_trait::async_trait;
use domain::{ApplicationMetrics, FaultType, SystemMetrics};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::chaos::{FaultGate, ResourcePressure};

/// Baselines and noise of the simulated probes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Idle CPU utilization
    pub cpu_usage: f64,
    /// Idle memory utilization
    pub memory_usage: f64,
    /// Disk utilization
    pub disk_usage: f64,
    /// Idle network utilization
    pub network_usage: f64,
    /// Healthy response time in milliseconds
    pub response_time_ms: f64,
    /// Healthy error rate
    pub error_rate: f64,
    /// Healthy throughput
    pub throughput_rps: f64,
    /// Healthy availability
    pub availability: f64,
    /// Relative noise applied to every reading
    pub jitter: f64,
    /// Memory the pressure gauge is measured against
    pub memory_capacity_mb: u64,
    /// Cores the pressure gauge is measured against
    pub cpu_cores: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cpu_usage: 0.25,
            memory_usage: 0.4,
            disk_usage: 0.5,
            network_usage: 0.2,
            response_time_ms: 120.0,
            error_rate: 0.005,
            throughput_rps: 250.0,
            availability: 0.999,
            jitter: 0.05,
            memory_capacity_mb: 1024,
            cpu_cores: 4,
        }
    }
}

impl SimulationConfig {
    /// Same baselines without noise
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }
}

fn noise(jitter: f64) -> f64 {
    if jitter <= 0.0 || jitter.is_nan() {
        return 0.0;
    }
    rand::rng().random_range(-jitter..=jitter)
}

/// System probe reading baselines plus held resource pressure
#[derive(Debug, Clone)]
pub struct SimulatedSystemProbe {
    config: SimulationConfig,
    pressure: Option<Arc<ResourcePressure>>,
}

impl SimulatedSystemProbe {
    /// Probe around `config` baselines
    pub const fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            pressure: None,
        }
    }

    /// Reflect memory leaks and CPU spikes
    #[must_use]
    pub fn with_pressure(mut self, pressure: Arc<ResourcePressure>) -> Self {
        self.pressure = Some(pressure);
        self
    }

    /// Reading without noise
    pub fn expected(&self) -> SystemMetrics {
        let (memory, cpu) = self.pressure.as_ref().map_or((0.0, 0.0), |p| {
            (
                p.memory_fraction(self.config.memory_capacity_mb * 1024 * 1024),
                p.cpu_fraction(self.config.cpu_cores),
            )
        });
        SystemMetrics {
            cpu_usage: (self.config.cpu_usage + cpu).clamp(0.0, 1.0),
            memory_usage: (self.config.memory_usage + memory).clamp(0.0, 1.0),
            disk_usage: self.config.disk_usage.clamp(0.0, 1.0),
            network_usage: self.config.network_usage.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl SystemProbePort for SimulatedSystemProbe {
    async fn collect(&self) -> Result<SystemMetrics, ApplicationError> {
        let expected = self.expected();
        let jitter = self.config.jitter * 0.1;
        let reading = SystemMetrics {
            cpu_usage: (expected.cpu_usage + noise(jitter)).clamp(0.0, 1.0),
            memory_usage: (expected.memory_usage + noise(jitter)).clamp(0.0, 1.0),
            disk_usage: expected.disk_usage,
            network_usage: (expected.network_usage + noise(jitter)).clamp(0.0, 1.0),
        };
        trace!(?reading, "Simulated system reading");
        Ok(reading)
    }
}

/// Application probe reading baselines degraded by armed gate faults
#[derive(Debug, Clone)]
pub struct SimulatedApplicationProbe {
    config: SimulationConfig,
    gate: Option<Arc<FaultGate>>,
    pressure: Option<Arc<ResourcePressure>>,
}

impl SimulatedApplicationProbe {
    /// Probe around `config` baselines
    pub const fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            gate: None,
            pressure: None,
        }
    }

    /// Degrade readings while faults are armed on `gate`
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<FaultGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Slow responses down while CPU workers spin
    #[must_use]
    pub fn with_pressure(mut self, pressure: Arc<ResourcePressure>) -> Self {
        self.pressure = Some(pressure);
        self
    }

    /// Reading without noise
    pub fn expected(&self) -> ApplicationMetrics {
        let mut response_time_ms = self.config.response_time_ms;
        let mut error_rate = self.config.error_rate;
        let mut availability = self.config.availability;
        let mut throughput_rps = self.config.throughput_rps;

        let armed = self.gate.as_ref().map(|gate| gate.armed()).unwrap_or_default();
        for fault in &armed {
            match fault {
                FaultType::Exception => {
                    error_rate += 0.25;
                    availability -= 0.1;
                },
                FaultType::Timeout => {
                    response_time_ms += 2_000.0;
                    error_rate += 0.05;
                    availability -= 0.05;
                },
                FaultType::NetworkError
                | FaultType::DatabaseError
                | FaultType::CacheError
                | FaultType::DiskError => {
                    response_time_ms += 50.0;
                    error_rate += 0.12;
                    availability -= 0.05;
                },
                FaultType::MemoryLeak
                | FaultType::CpuSpike
                | FaultType::Random
                | FaultType::Custom(_) => {},
            }
        }

        if let Some(pressure) = &self.pressure {
            let cpu = pressure.cpu_fraction(self.config.cpu_cores);
            response_time_ms *= 1.0 + cpu;
            throughput_rps *= 1.0 - cpu * 0.5;
        }
        throughput_rps *= availability.clamp(0.0, 1.0);

        ApplicationMetrics {
            response_time_ms: response_time_ms.max(0.0),
            error_rate: error_rate.clamp(0.0, 1.0),
            throughput_rps: throughput_rps.max(0.0),
            availability: availability.clamp(0.0, 1.0),
            custom: BTreeMap::new(),
        }
    }
}

#[async_trait]
impl ApplicationProbePort for SimulatedApplicationProbe {
    async fn collect(
        &self,
        custom: &BTreeMap<String, f64>,
    ) -> Result<ApplicationMetrics, ApplicationError> {
        let expected = self.expected();
        let jitter = self.config.jitter;
        let reading = ApplicationMetrics {
            response_time_ms: (expected.response_time_ms * (1.0 + noise(jitter))).max(0.0),
            error_rate: (expected.error_rate + noise(jitter * 0.05)).clamp(0.0, 1.0),
            throughput_rps: (expected.throughput_rps * (1.0 + noise(jitter))).max(0.0),
            availability: (expected.availability - noise(jitter * 0.02).abs()).clamp(0.0, 1.0),
            custom: custom.clone(),
        };
        trace!(
            error_rate = reading.error_rate,
            response_time_ms = reading.response_time_ms,
            "Simulated application reading"
        );
        Ok(reading)
    }
}
