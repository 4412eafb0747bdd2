//! Scheduler utilization monitoring for the write pipeline.
//!
//! [`UtilizationMonitor`] records stage checkpoints with a runtime snapshot
//! attached and raises three advisory alarms: a one-shot low-utilization
//! warning, a sustained below-target alarm for heavy stages, and a per-queue
//! below-target alarm.

pub mod alarms;
pub mod checkpoint;
pub mod monitor;
pub mod runtime;
pub mod snapshot;
pub mod types;

pub use alarms::{Alarm, LowUtilizationLatch, QUEUE_UTILIZATION_BREACH_STEP, UTILIZATION_BREACH_STEP};
pub use checkpoint::{CheckpointRecord, CheckpointSink, MemoryCheckpointSink};
pub use monitor::UtilizationMonitor;
pub use runtime::{
    HostSample, HostSampler, InFlightTelemetry, MonitorRuntime, PendingQueue, RuntimeQueues,
    SchedulerStatsSource, SystemHostSampler, TelemetryInFlight, WorkerPoolStats,
};
pub use snapshot::RuntimeSnapshot;
pub use types::{
    MonitorSettings, QueueActivity, SchedulerStats, TelemetryOptions, UtilizationSample,
    HEAVY_UTILIZATION_STAGES,
};
