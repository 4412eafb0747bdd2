//! Mutable queue bookkeeping. Always accessed under the queue's mutex.

use std::fmt;
use std::time::Duration;

use crate::heap::HeapPressure;
use crate::limits::{PendingSnapshot, QueueLimits};
use crate::ring::RingBuffer;
use crate::stats::{
    BackpressureStats, GaugeStats, HighWater, MemoryStats, OversizeStats, PayloadStats,
    PendingStats, QueueStats,
};

/// Number of completed waits kept for the p95 figure.
const WAIT_SAMPLE_CAPACITY: usize = 256;

/// First limit dimension a reservation would violate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    Count,
    Rows,
    Bytes,
}

impl WaitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Rows => "rows",
            Self::Bytes => "bytes",
        }
    }
}

impl fmt::Display for WaitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits applied to one reservation after oversize and heap adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLimits {
    pub max_count: Option<u64>,
    pub max_rows: Option<u64>,
    pub max_bytes: Option<u64>,
}

impl EffectiveLimits {
    /// Row and byte caps never drop below the payload itself, so an oversize
    /// payload is billed at cost instead of waiting forever.
    pub fn for_payload(limits: &QueueLimits, pressure: &HeapPressure, rows: u64, bytes: u64) -> Self {
        let max_rows = pressure
            .scale(limits.max_pending_rows.map(|m| m.max(rows)))
            .map(|m| m.max(rows));
        let max_bytes = pressure
            .scale(limits.max_pending_bytes.map(|m| m.max(bytes)))
            .map(|m| m.max(bytes));
        Self {
            max_count: pressure.scale(limits.max_pending),
            max_rows,
            max_bytes,
        }
    }
}

#[derive(Debug)]
pub struct QueueState {
    pending: PendingStats,
    high_water: HighWater,
    backpressure: BackpressureStats,
    wait_samples: RingBuffer<u64>,
    oversize: OversizeStats,
    pressure_events: u64,
    payload_samples: u64,
    measured_rows: u64,
    measured_bytes: u64,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            pending: PendingStats::default(),
            high_water: HighWater::default(),
            backpressure: BackpressureStats::default(),
            wait_samples: RingBuffer::new(WAIT_SAMPLE_CAPACITY),
            oversize: OversizeStats::default(),
            pressure_events: 0,
            payload_samples: 0,
            measured_rows: 0,
            measured_bytes: 0,
        }
    }
}

impl QueueState {
    pub fn wait_reason(&self, rows: u64, bytes: u64, limits: &EffectiveLimits) -> Option<WaitReason> {
        let over = |limit: Option<u64>, current: u64, add: u64| {
            limit.is_some_and(|max| current.saturating_add(add) > max)
        };
        if over(limits.max_count, self.pending.count, 1) {
            Some(WaitReason::Count)
        } else if over(limits.max_rows, self.pending.rows, rows) {
            Some(WaitReason::Rows)
        } else if over(limits.max_bytes, self.pending.bytes, bytes) {
            Some(WaitReason::Bytes)
        } else {
            None
        }
    }

    pub fn note_oversize(&mut self, rows: bool, bytes: bool) {
        self.oversize.rows += u64::from(rows);
        self.oversize.bytes += u64::from(bytes);
    }

    pub fn note_pressure(&mut self, pressure: &HeapPressure) {
        if pressure.active {
            self.pressure_events += 1;
            self.note_heap(pressure.heap_used, pressure.heap_ratio);
        }
    }

    /// Start of a blocking episode, attributed to the first violated dimension.
    pub fn begin_backpressure(&mut self, reason: WaitReason) {
        self.backpressure.count += 1;
        match reason {
            WaitReason::Count => self.backpressure.by_count += 1,
            WaitReason::Rows => self.backpressure.by_rows += 1,
            WaitReason::Bytes => self.backpressure.by_bytes += 1,
        }
    }

    pub fn finish_backpressure(&mut self, waited: Duration) {
        let ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
        self.backpressure.wait_ms = self.backpressure.wait_ms.saturating_add(ms);
        self.backpressure.max_wait_ms = self.backpressure.max_wait_ms.max(ms);
        self.backpressure.events += 1;
        self.wait_samples.push(ms);
    }

    pub fn note_bypass(&mut self) {
        self.backpressure.bypass += 1;
    }

    pub fn commit(&mut self, rows: u64, bytes: u64) -> PendingSnapshot {
        self.pending.count += 1;
        self.pending.rows = self.pending.rows.saturating_add(rows);
        self.pending.bytes = self.pending.bytes.saturating_add(bytes);
        self.payload_samples += 1;
        self.measured_rows = self.measured_rows.saturating_add(rows);
        self.measured_bytes = self.measured_bytes.saturating_add(bytes);
        self.high_water.pending = self.high_water.pending.max(self.pending.count);
        self.high_water.rows = self.high_water.rows.max(self.pending.rows);
        self.high_water.bytes = self.high_water.bytes.max(self.pending.bytes);
        self.snapshot()
    }

    /// Counters floor at zero so a stray double release cannot underflow.
    pub fn release(&mut self, rows: u64, bytes: u64) -> PendingSnapshot {
        self.pending.count = self.pending.count.saturating_sub(1);
        self.pending.rows = self.pending.rows.saturating_sub(rows);
        self.pending.bytes = self.pending.bytes.saturating_sub(bytes);
        self.snapshot()
    }

    pub fn note_heap(&mut self, heap_used: u64, heap_ratio: f64) {
        self.high_water.heap_used = self.high_water.heap_used.max(heap_used);
        if heap_ratio.is_finite() && heap_ratio > self.high_water.heap_ratio {
            self.high_water.heap_ratio = heap_ratio;
        }
    }

    pub fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            pending_count: self.pending.count,
            pending_rows: self.pending.rows,
            pending_bytes: self.pending.bytes,
        }
    }

    pub fn stats(&self, limits: QueueLimits, heap_limit: Option<u64>) -> QueueStats {
        let avg = |total: u64| {
            if self.payload_samples == 0 {
                0.0
            } else {
                total as f64 / self.payload_samples as f64
            }
        };
        QueueStats {
            limits,
            pending: self.pending,
            high_water: self.high_water,
            backpressure: BackpressureStats {
                p95_wait_ms: self.wait_samples.percentile(95.0),
                ..self.backpressure
            },
            payload: PayloadStats {
                samples: self.payload_samples,
                measured_rows: self.measured_rows,
                measured_bytes: self.measured_bytes,
                avg_rows: avg(self.measured_rows),
                avg_bytes: avg(self.measured_bytes),
            },
            gauge: GaugeStats {
                pending_count: self.pending.count,
                pending_rows: self.pending.rows,
                pending_bytes: self.pending.bytes,
                high_water_pending_count: self.high_water.pending,
                high_water_pending_rows: self.high_water.rows,
                high_water_pending_bytes: self.high_water.bytes,
            },
            oversize: self.oversize,
            memory: MemoryStats {
                heap_limit_bytes: heap_limit,
                pressure_events: self.pressure_events,
            },
        }
    }
}
