use serde::{Deserialize, Serialize};

use super::raw::ArtifactConfig;

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration for the write-path flow-control core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowgateConfig {
    /// Backpressure queue limits.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Raw artifact-write tunables (camelCase keys, loosely typed).
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Scheduler utilization alarm settings.
    #[serde(default)]
    pub scheduler: SchedulerAlertConfig,

    /// Filesystem write strategy chosen by the surrounding system.
    #[serde(default)]
    pub write_fs: WriteFsConfig,
}

// ── Section configs ─────────────────────────────────────────────────

/// Queue section. Every limit is optional; unset means unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of in-flight reservations.
    pub max_pending: Option<u64>,

    /// Maximum summed payload rows across in-flight reservations.
    pub max_pending_rows: Option<u64>,

    /// Maximum summed payload bytes across in-flight reservations.
    pub max_pending_bytes: Option<u64>,

    /// Heap usage fraction above which limits shrink (default 0.8, >= 1 disables).
    pub max_heap_fraction: Option<f64>,
}

/// Scheduler section: utilization alarms and queue-depth snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerAlertConfig {
    /// Utilization below which the sustained alarms arm (default 0.75).
    pub utilization_alert_target: Option<f64>,

    /// How long utilization must stay under target before alarming (default 15000ms).
    pub utilization_alert_window_ms: Option<u64>,

    /// Queue-depth snapshot cadence forwarded to the scheduler (default 5000ms).
    pub queue_depth_snapshot_interval_ms: Option<u64>,

    /// File count at which queue-depth snapshots switch on (default 20000).
    pub queue_depth_snapshot_file_threshold: Option<u64>,

    /// Huge-repository profile: enables queue-depth snapshots immediately.
    #[serde(default)]
    pub huge_repo_profile: bool,
}

/// Write filesystem strategy section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFsConfig {
    /// Whether a tail-draining writer topology was chosen.
    #[serde(default = "default_tail_worker")]
    pub tail_worker: bool,
}

fn default_tail_worker() -> bool {
    true
}

impl Default for WriteFsConfig {
    fn default() -> Self {
        Self {
            tail_worker: default_tail_worker(),
        }
    }
}
