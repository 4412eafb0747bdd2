//! The backpressure queue: multi-dimensional admission control for writes.
//!
//! Producers `reserve` before starting a write and release the returned
//! [`Reservation`] when it completes. A denied producer parks on a shared
//! [`Notify`]; every release wakes all parked producers, each of which
//! re-runs the admission check. No ordering among waiters is promised.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use flowgate_core::{emit_line, LogSink, RateLimiter};

use crate::heap::{HeapPressure, HeapProbe, SystemHeapProbe};
use crate::limits::{OnChange, PendingSnapshot, QueueLimits, QueueOptions};
use crate::state::{EffectiveLimits, QueueState, WaitReason};
use crate::stats::QueueStats;

/// Minimum spacing between two backpressure log lines.
pub const BACKPRESSURE_LOG_INTERVAL: Duration = Duration::from_secs(5);

const BACKPRESSURE_LOG_KEY: &str = "postings-backpressure";
const MB: f64 = 1024.0 * 1024.0;

/// Arguments to [`BackpressureQueue::reserve`].
///
/// `rows` below one is billed as one row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReserveRequest {
    pub rows: u64,
    pub bytes: u64,
    pub bypass: bool,
}

impl ReserveRequest {
    pub fn new(rows: u64, bytes: u64) -> Self {
        Self {
            rows,
            bytes,
            bypass: false,
        }
    }

    /// Skip every admission check. Reserved for ordered consumers that must
    /// admit their head-of-line write to avoid deadlocking on their own tail.
    pub fn bypass(mut self) -> Self {
        self.bypass = true;
        self
    }
}

impl From<crate::payload::PayloadEstimate> for ReserveRequest {
    fn from(estimate: crate::payload::PayloadEstimate) -> Self {
        Self::new(estimate.rows, estimate.bytes)
    }
}

struct Shared {
    limits: QueueLimits,
    heap_probe: Arc<dyn HeapProbe>,
    heap_limit: Option<u64>,
    state: Mutex<QueueState>,
    notify: Notify,
    on_change: Option<OnChange>,
    log: Option<LogSink>,
    log_gate: RateLimiter,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn heap_reading(&self) -> Option<(u64, f64)> {
        let used = self.heap_probe.heap_used()?;
        let ratio = match self.heap_limit {
            Some(limit) if limit > 0 => used as f64 / limit as f64,
            _ => 0.0,
        };
        Some((used, ratio))
    }

    /// A panicking callback must not poison queue accounting.
    fn emit_change(&self, snapshot: PendingSnapshot) {
        if let Some(on_change) = &self.on_change {
            let _ = panic::catch_unwind(AssertUnwindSafe(|| on_change(snapshot)));
        }
    }

    fn release(&self, rows: u64, bytes: u64) {
        let reading = self.heap_reading();
        let snapshot = {
            let mut state = self.lock();
            if let Some((used, ratio)) = reading {
                state.note_heap(used, ratio);
            }
            state.release(rows, bytes)
        };
        self.emit_change(snapshot);
        self.notify.notify_waiters();
    }

    fn log_backpressure(&self, reason: WaitReason, limits: &EffectiveLimits) {
        debug!(
            reason = reason.as_str(),
            max_count = ?limits.max_count,
            max_rows = ?limits.max_rows,
            max_bytes = ?limits.max_bytes,
            "queue backpressure"
        );
        if !self.log_gate.allow(BACKPRESSURE_LOG_KEY) {
            return;
        }
        let count = limits
            .max_count
            .map_or_else(|| "∞".to_string(), |v| v.to_string());
        let rows = limits
            .max_rows
            .map_or_else(|| "∞".to_string(), |v| v.to_string());
        let bytes = limits
            .max_bytes
            .map_or_else(|| "∞".to_string(), |v| format!("{:.1}MB", v as f64 / MB));
        emit_line(
            self.log.as_ref(),
            &format!("[postings] backpressure ({reason}) maxPending={count} maxRows={rows} maxBytes={bytes}."),
        );
    }
}

/// Admission gate bounding in-flight writes by count, rows, bytes and heap.
///
/// Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct BackpressureQueue {
    inner: Arc<Shared>,
}

impl std::fmt::Debug for BackpressureQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureQueue")
            .field("limits", &self.inner.limits)
            .field("heap_limit", &self.inner.heap_limit)
            .field("pending", &self.pending())
            .finish()
    }
}

impl BackpressureQueue {
    pub fn new(options: QueueOptions) -> Self {
        let limits = options.limits();
        let heap_probe = options
            .heap_probe
            .unwrap_or_else(|| Arc::new(SystemHeapProbe::new()));
        let heap_limit = heap_probe.heap_limit().filter(|l| *l > 0);
        debug!(
            max_pending = ?limits.max_pending,
            max_pending_rows = ?limits.max_pending_rows,
            max_pending_bytes = ?limits.max_pending_bytes,
            max_heap_fraction = limits.max_heap_fraction,
            heap_limit = ?heap_limit,
            "backpressure queue created"
        );
        Self {
            inner: Arc::new(Shared {
                limits,
                heap_probe,
                heap_limit,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                on_change: options.on_change,
                log: options.log,
                log_gate: RateLimiter::new(BACKPRESSURE_LOG_INTERVAL),
            }),
        }
    }

    pub fn limits(&self) -> QueueLimits {
        self.inner.limits
    }

    /// Current pending totals.
    pub fn pending(&self) -> PendingSnapshot {
        self.inner.lock().snapshot()
    }

    /// Wait until the payload fits and reserve it.
    ///
    /// Never fails; it only delays. Heap pressure is sampled once per call:
    /// a caller that parks under pressure keeps the shrunken limits it
    /// sampled for its whole wait, even if the heap recovers meanwhile.
    /// Dropping the future before it resolves reserves nothing.
    pub async fn reserve(&self, request: ReserveRequest) -> Reservation {
        let shared = &self.inner;
        let rows = request.rows.max(1);
        let bytes = request.bytes;
        let limits = shared.limits;

        let reading = shared.heap_reading();
        let pressure = match reading {
            Some((used, _)) if !request.bypass => {
                HeapPressure::evaluate(used, shared.heap_limit, limits.max_heap_fraction)
            }
            _ => HeapPressure::NONE,
        };
        let effective = EffectiveLimits::for_payload(&limits, &pressure, rows, bytes);

        {
            let mut state = shared.lock();
            state.note_oversize(
                limits.max_pending_rows.is_some_and(|m| rows > m),
                limits.max_pending_bytes.is_some_and(|m| bytes > m),
            );
            state.note_pressure(&pressure);
        }

        let snapshot = if request.bypass {
            let mut state = shared.lock();
            state.note_bypass();
            commit(&mut state, rows, bytes, reading)
        } else {
            let mut wait_start: Option<Instant> = None;
            loop {
                let notified = shared.notify.notified();
                tokio::pin!(notified);
                // Register before checking so a release in between is not missed.
                notified.as_mut().enable();

                let admission = {
                    let mut state = shared.lock();
                    match state.wait_reason(rows, bytes, &effective) {
                        None => {
                            if let Some(start) = wait_start {
                                state.finish_backpressure(start.elapsed());
                            }
                            Admission::Admitted(commit(&mut state, rows, bytes, reading))
                        }
                        Some(reason) => {
                            let first = wait_start.is_none();
                            if first {
                                state.begin_backpressure(reason);
                            }
                            Admission::Denied { reason, first }
                        }
                    }
                };

                match admission {
                    Admission::Admitted(snapshot) => break snapshot,
                    Admission::Denied { reason, first } => {
                        if first {
                            wait_start = Some(Instant::now());
                            shared.log_backpressure(reason, &effective);
                        }
                        notified.await;
                    }
                }
            }
        };

        shared.emit_change(snapshot);
        Reservation {
            queue: Arc::clone(shared),
            rows,
            bytes,
            released: false,
        }
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats(self.inner.limits, self.inner.heap_limit)
    }
}

enum Admission {
    Admitted(PendingSnapshot),
    Denied { reason: WaitReason, first: bool },
}

fn commit(state: &mut QueueState, rows: u64, bytes: u64, reading: Option<(u64, f64)>) -> PendingSnapshot {
    if let Some((used, ratio)) = reading {
        state.note_heap(used, ratio);
    }
    state.commit(rows, bytes)
}

/// Admitted capacity. Released explicitly or on drop, exactly once.
#[must_use = "dropping a reservation releases it immediately"]
pub struct Reservation {
    queue: Arc<Shared>,
    rows: u64,
    bytes: u64,
    released: bool,
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("rows", &self.rows)
            .field("bytes", &self.bytes)
            .field("released", &self.released)
            .finish()
    }
}

impl Reservation {
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Return the capacity to the queue and wake every waiter.
    ///
    /// Repeated calls are no-ops.
    pub fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        self.queue.release(self.rows, self.bytes);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release();
    }
}
