//! Operational snapshot attached to every stage checkpoint.

use std::sync::Arc;

use serde::Serialize;

use crate::runtime::{MonitorRuntime, PendingQueue, TelemetryInFlight};
use crate::types::SchedulerStats;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSnapshot {
    pub scheduler: Option<SchedulerStats>,
    pub cpu: CpuSnapshot,
    pub memory: MemorySnapshot,
    pub queues: Option<QueueDepths>,
    pub in_flight_bytes: InFlightSnapshot,
    pub workers: WorkerSnapshot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuSnapshot {
    pub cores: Option<usize>,
    pub load_avg_1m: Option<f64>,
    /// One-minute load divided by core count, clamped to `[0, 1]`.
    pub normalized_load: Option<f64>,
    /// Busy percentage from normalized load, else from process CPU time.
    pub busy_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub total_bytes: Option<u64>,
    pub free_bytes: Option<u64>,
    pub utilization: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepths {
    pub io_pending: Option<u64>,
    pub cpu_pending: Option<u64>,
    pub embedding_pending: Option<u64>,
    pub proc_pending: Option<u64>,
    pub scheduler_pending: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueInFlight {
    pub io: u64,
    pub cpu: u64,
    pub embedding: u64,
    pub proc: u64,
}

impl QueueInFlight {
    fn sum(&self) -> u64 {
        self.io
            .saturating_add(self.cpu)
            .saturating_add(self.embedding)
            .saturating_add(self.proc)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InFlightSnapshot {
    pub queue: Option<QueueInFlight>,
    pub telemetry: Option<TelemetryInFlight>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    pub tokenize: Option<serde_json::Value>,
    pub quantize: Option<serde_json::Value>,
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl RuntimeSnapshot {
    pub fn capture(runtime: &MonitorRuntime) -> Self {
        let scheduler = runtime.scheduler_stats();
        let host = runtime.host.sample();

        let cores = runtime.cpu_count.or(host.cores);
        let normalized_load = match (host.load_avg_1m, cores) {
            (Some(load), Some(cores)) if cores > 0 => Some((load / cores as f64).clamp(0.0, 1.0)),
            _ => None,
        };
        let busy_pct = normalized_load
            .map(|n| round_tenth(n * 100.0))
            .or(host.process_busy_pct.map(round_tenth))
            .map(|pct| pct.clamp(0.0, 100.0));

        let memory = match host.total_memory.filter(|t| *t > 0) {
            Some(total) => {
                let free = host.free_memory.unwrap_or(0);
                MemorySnapshot {
                    total_bytes: Some(total),
                    free_bytes: host.free_memory.filter(|f| *f > 0),
                    utilization: Some((total.saturating_sub(free) as f64 / total as f64).clamp(0.0, 1.0)),
                }
            }
            None => MemorySnapshot {
                free_bytes: host.free_memory.filter(|f| *f > 0),
                ..MemorySnapshot::default()
            },
        };

        let size = |queue: &Option<Arc<dyn PendingQueue>>| queue.as_ref().and_then(|q| q.size());
        let bytes = |queue: &Option<Arc<dyn PendingQueue>>| queue.as_ref().map_or(0, |q| q.inflight_bytes());
        let queues = runtime.queues.as_ref().map(|q| QueueDepths {
            io_pending: size(&q.io),
            cpu_pending: size(&q.cpu),
            embedding_pending: size(&q.embedding),
            proc_pending: size(&q.proc),
            scheduler_pending: scheduler.as_ref().map(SchedulerStats::queue_depth),
        });
        let queue_in_flight = runtime.queues.as_ref().map(|q| QueueInFlight {
            io: bytes(&q.io),
            cpu: bytes(&q.cpu),
            embedding: bytes(&q.embedding),
            proc: bytes(&q.proc),
        });
        let telemetry = runtime.telemetry.as_ref().and_then(|t| t.read_in_flight_bytes());
        let total = queue_in_flight
            .map_or(0, |q| q.sum())
            .saturating_add(telemetry.as_ref().map_or(0, |t| t.total));

        let tokenize = runtime.worker_pool.as_ref().and_then(|p| p.stats());
        let quantize = match (&runtime.quantize_pool, &runtime.worker_pool) {
            (Some(q), Some(w)) if Arc::ptr_eq(q, w) => None,
            (Some(q), _) => q.stats(),
            (None, _) => None,
        };

        Self {
            scheduler,
            cpu: CpuSnapshot {
                cores,
                load_avg_1m: host.load_avg_1m,
                normalized_load,
                busy_pct,
            },
            memory,
            queues,
            in_flight_bytes: InFlightSnapshot {
                queue: queue_in_flight,
                telemetry,
                total,
            },
            workers: WorkerSnapshot { tokenize, quantize },
        }
    }
}
