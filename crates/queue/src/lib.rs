//! Multi-dimensional backpressure queue for artifact writes.
//!
//! Admission is bounded by in-flight reservation count, summed payload rows,
//! summed payload bytes, and host heap pressure. See [`BackpressureQueue`].

pub mod heap;
pub mod limits;
pub mod payload;
pub mod queue;
pub mod ring;
pub mod state;
pub mod stats;

pub use heap::{FixedHeapProbe, HeapPressure, HeapProbe, SystemHeapProbe};
pub use limits::{OnChange, PendingSnapshot, QueueLimits, QueueOptions, DEFAULT_MAX_HEAP_FRACTION};
pub use payload::{estimate_payload, PayloadEstimate};
pub use queue::{BackpressureQueue, Reservation, ReserveRequest, BACKPRESSURE_LOG_INTERVAL};
pub use state::WaitReason;
pub use stats::QueueStats;
