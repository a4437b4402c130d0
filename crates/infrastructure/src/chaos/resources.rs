//! Resource-consuming fault mechanisms
//!
//! Memory growth without release and a sustained CPU-bound loop on blocking
//! workers. Both report into a shared [`ResourcePressure`] gauge so that probes
//! can reflect them, and both are released by dropping or stopping the handle.

use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use application::CancelSignal;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bytes per leaked chunk
pub const LEAK_CHUNK_BYTES: usize = 1024 * 1024;

/// Busy slice of one CPU worker iteration
const CPU_SLICE: Duration = Duration::from_millis(10);

/// Process-wide gauge of resources held by active fault mechanisms
#[derive(Debug, Default)]
pub struct ResourcePressure {
    retained_bytes: AtomicU64,
    busy_workers: AtomicUsize,
}

impl ResourcePressure {
    /// Create an idle gauge
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently retained by memory leaks
    pub fn retained_bytes(&self) -> u64 {
        self.retained_bytes.load(Ordering::Relaxed)
    }

    /// CPU workers currently spinning
    pub fn busy_workers(&self) -> usize {
        self.busy_workers.load(Ordering::Relaxed)
    }

    /// Retained memory as a fraction of `capacity_bytes`
    #[allow(clippy::cast_precision_loss)]
    pub fn memory_fraction(&self, capacity_bytes: u64) -> f64 {
        if capacity_bytes == 0 {
            return 0.0;
        }
        (self.retained_bytes() as f64 / capacity_bytes as f64).min(1.0)
    }

    /// Busy workers as a fraction of `cores`
    #[allow(clippy::cast_precision_loss)]
    pub fn cpu_fraction(&self, cores: usize) -> f64 {
        if cores == 0 {
            return 0.0;
        }
        (self.busy_workers() as f64 / cores as f64).min(1.0)
    }
}

/// Memory grown without release until the leak is dropped
#[derive(Debug)]
pub struct MemoryLeak {
    chunks: Vec<Vec<u8>>,
    limit_bytes: usize,
    pressure: Arc<ResourcePressure>,
}

impl MemoryLeak {
    /// Start a leak that never retains more than `limit_bytes`
    pub fn new(limit_bytes: usize, pressure: Arc<ResourcePressure>) -> Self {
        Self {
            chunks: Vec::new(),
            limit_bytes,
            pressure,
        }
    }

    /// Retain up to `bytes` more, in whole chunks; returns bytes added
    pub fn grow(&mut self, bytes: usize) -> usize {
        let room = self.limit_bytes.saturating_sub(self.retained());
        let chunks = bytes.min(room) / LEAK_CHUNK_BYTES;
        for _ in 0..chunks {
            // Touch every page so the allocation is resident
            self.chunks.push(vec![0xA5; LEAK_CHUNK_BYTES]);
        }
        let added = chunks * LEAK_CHUNK_BYTES;
        self.pressure
            .retained_bytes
            .fetch_add(added as u64, Ordering::Relaxed);
        if added > 0 {
            debug!(added, retained = self.retained(), "Memory leak grew");
        }
        added
    }

    /// Bytes retained by this leak
    pub fn retained(&self) -> usize {
        self.chunks.len() * LEAK_CHUNK_BYTES
    }
}

impl Drop for MemoryLeak {
    fn drop(&mut self) {
        let released = self.retained() as u64;
        self.chunks.clear();
        self.pressure
            .retained_bytes
            .fetch_sub(released.min(self.pressure.retained_bytes()), Ordering::Relaxed);
        if released > 0 {
            info!(released, "Leaked memory released");
        }
    }
}

/// Sustained CPU-bound loop on blocking workers
#[derive(Debug)]
pub struct CpuSpike {
    cancel: CancelSignal,
    workers: Vec<JoinHandle<()>>,
}

impl CpuSpike {
    /// Start `workers` spinning loops at `intensity` (busy fraction in `(0, 1]`)
    ///
    /// Workers stop when `cancel` (or any ancestor signal) fires.
    pub fn start(
        workers: usize,
        intensity: f64,
        cancel: CancelSignal,
        pressure: &Arc<ResourcePressure>,
    ) -> Self {
        let intensity = if intensity.is_nan() {
            1.0
        } else {
            intensity.clamp(0.05, 1.0)
        };
        let idle = CPU_SLICE.mul_f64((1.0 - intensity) / intensity);

        let handles = (0..workers.max(1))
            .map(|worker| {
                let cancel = cancel.clone();
                let pressure = Arc::clone(pressure);
                tokio::task::spawn_blocking(move || {
                    pressure.busy_workers.fetch_add(1, Ordering::Relaxed);
                    let mut spins: u64 = 0;
                    while !cancel.is_cancelled() {
                        let slice = Instant::now();
                        while slice.elapsed() < CPU_SLICE {
                            spins = black_box(spins.wrapping_mul(31).wrapping_add(7));
                        }
                        if !idle.is_zero() {
                            std::thread::sleep(idle);
                        }
                    }
                    pressure.busy_workers.fetch_sub(1, Ordering::Relaxed);
                    debug!(worker, "CPU worker stopped");
                })
            })
            .collect::<Vec<_>>();

        info!(workers = handles.len(), intensity, "CPU spike started");
        Self {
            cancel,
            workers: handles,
        }
    }

    /// Signal all workers and wait for them to exit
    ///
    /// Returns `false` if any worker panicked.
    pub async fn stop(self) -> bool {
        self.cancel.cancel();
        let mut clean = true;
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "CPU worker ended abnormally");
                clean = false;
            }
        }
        clean
    }
}
