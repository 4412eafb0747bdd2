//! Runtime collaborators the monitor reads from.
//!
//! Everything the monitor observes sits behind a trait so the pipeline can
//! wire in its real scheduler, queues and pools, and tests can supply fakes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

use flowgate_queue::BackpressureQueue;

use crate::types::{SchedulerStats, TelemetryOptions};

/// The pipeline scheduler.
pub trait SchedulerStatsSource: Send + Sync {
    fn stats(&self) -> Option<SchedulerStats>;

    /// Merge telemetry options into the scheduler's telemetry config.
    fn set_telemetry_options(&self, _options: TelemetryOptions) {}
}

/// A work queue whose depth and in-flight bytes are sampled.
pub trait PendingQueue: Send + Sync {
    /// Queued items, when the queue reports a size.
    fn size(&self) -> Option<u64>;

    fn inflight_bytes(&self) -> u64 {
        0
    }
}

/// In-flight byte gauges maintained by the pipeline's telemetry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryInFlight {
    pub total: u64,
    #[serde(flatten)]
    pub channels: BTreeMap<String, u64>,
}

pub trait InFlightTelemetry: Send + Sync {
    fn read_in_flight_bytes(&self) -> Option<TelemetryInFlight>;
}

/// A worker pool reporting opaque stats.
pub trait WorkerPoolStats: Send + Sync {
    fn stats(&self) -> Option<serde_json::Value>;
}

/// One reading of host CPU and memory.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostSample {
    pub cores: Option<usize>,
    pub load_avg_1m: Option<f64>,
    /// Process CPU use as a percentage of all cores, when measurable.
    pub process_busy_pct: Option<f64>,
    pub total_memory: Option<u64>,
    pub free_memory: Option<u64>,
}

pub trait HostSampler: Send + Sync {
    fn sample(&self) -> HostSample;
}

impl PendingQueue for BackpressureQueue {
    fn size(&self) -> Option<u64> {
        Some(self.pending().pending_count)
    }

    fn inflight_bytes(&self) -> u64 {
        self.pending().pending_bytes
    }
}

// ── sysinfo sampler ─────────────────────────────────────────────────

/// Host sampler backed by `sysinfo`.
pub struct SystemHostSampler {
    system: Mutex<System>,
}

impl fmt::Debug for SystemHostSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemHostSampler").finish_non_exhaustive()
    }
}

impl Default for SystemHostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemHostSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl HostSampler for SystemHostSampler {
    fn sample(&self) -> HostSample {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();

        let cores = system.cpus().len();
        let process_busy_pct = sysinfo::get_current_pid().ok().and_then(|pid| {
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_cpu(),
            );
            let usage = f64::from(system.process(pid)?.cpu_usage());
            (cores > 0).then(|| (usage / cores as f64).clamp(0.0, 100.0))
        });

        let load = System::load_average().one;
        let total = system.total_memory();
        let free = system.available_memory();
        HostSample {
            cores: (cores > 0).then_some(cores),
            load_avg_1m: (load.is_finite() && load >= 0.0).then_some(load),
            process_busy_pct,
            total_memory: (total > 0).then_some(total),
            free_memory: (free > 0).then_some(free),
        }
    }
}

// ── Runtime handle ──────────────────────────────────────────────────

/// The four named pipeline queues.
#[derive(Clone, Default)]
pub struct RuntimeQueues {
    pub io: Option<Arc<dyn PendingQueue>>,
    pub cpu: Option<Arc<dyn PendingQueue>>,
    pub embedding: Option<Arc<dyn PendingQueue>>,
    pub proc: Option<Arc<dyn PendingQueue>>,
}

/// Collaborators observed by the utilization monitor.
#[derive(Clone)]
pub struct MonitorRuntime {
    pub scheduler: Option<Arc<dyn SchedulerStatsSource>>,
    pub queues: Option<RuntimeQueues>,
    pub telemetry: Option<Arc<dyn InFlightTelemetry>>,
    pub worker_pool: Option<Arc<dyn WorkerPoolStats>>,
    pub quantize_pool: Option<Arc<dyn WorkerPoolStats>>,
    pub host: Arc<dyn HostSampler>,
    /// Pinned CPU list length, used instead of the host core count.
    pub cpu_count: Option<usize>,
}

impl fmt::Debug for MonitorRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorRuntime")
            .field("scheduler", &self.scheduler.is_some())
            .field("queues", &self.queues.is_some())
            .field("telemetry", &self.telemetry.is_some())
            .field("cpu_count", &self.cpu_count)
            .finish_non_exhaustive()
    }
}

impl MonitorRuntime {
    pub fn new(host: Arc<dyn HostSampler>) -> Self {
        Self {
            scheduler: None,
            queues: None,
            telemetry: None,
            worker_pool: None,
            quantize_pool: None,
            host,
            cpu_count: None,
        }
    }

    /// Runtime sampling the real host through `sysinfo`.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemHostSampler::new()))
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn SchedulerStatsSource>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn queues(mut self, queues: RuntimeQueues) -> Self {
        self.queues = Some(queues);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn InFlightTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn worker_pool(mut self, pool: Arc<dyn WorkerPoolStats>) -> Self {
        self.worker_pool = Some(pool);
        self
    }

    pub fn quantize_pool(mut self, pool: Arc<dyn WorkerPoolStats>) -> Self {
        self.quantize_pool = Some(pool);
        self
    }

    pub fn cpu_count(mut self, cpus: usize) -> Self {
        self.cpu_count = (cpus > 0).then_some(cpus);
        self
    }

    pub fn scheduler_stats(&self) -> Option<SchedulerStats> {
        self.scheduler.as_ref().and_then(|s| s.stats())
    }
}
