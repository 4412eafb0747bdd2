//! Read-only queue snapshots. Serialized field names are camelCase.

use serde::Serialize;

use crate::limits::QueueLimits;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub limits: QueueLimits,
    pub pending: PendingStats,
    pub high_water: HighWater,
    pub backpressure: BackpressureStats,
    pub payload: PayloadStats,
    pub gauge: GaugeStats,
    pub oversize: OversizeStats,
    pub memory: MemoryStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingStats {
    pub count: u64,
    pub rows: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HighWater {
    pub pending: u64,
    pub rows: u64,
    pub bytes: u64,
    pub heap_used: u64,
    pub heap_ratio: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpressureStats {
    /// Distinct blocking episodes.
    pub count: u64,
    pub wait_ms: u64,
    pub max_wait_ms: u64,
    /// Completed waits (episodes that were eventually admitted).
    pub events: u64,
    pub by_count: u64,
    pub by_rows: u64,
    pub by_bytes: u64,
    pub bypass: u64,
    /// 95th percentile over the most recent completed waits.
    pub p95_wait_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadStats {
    pub samples: u64,
    pub measured_rows: u64,
    pub measured_bytes: u64,
    pub avg_rows: f64,
    pub avg_bytes: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GaugeStats {
    pub pending_count: u64,
    pub pending_rows: u64,
    pub pending_bytes: u64,
    pub high_water_pending_count: u64,
    pub high_water_pending_rows: u64,
    pub high_water_pending_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OversizeStats {
    pub rows: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub heap_limit_bytes: Option<u64>,
    pub pressure_events: u64,
}
