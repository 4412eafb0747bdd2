//! Host heap telemetry consulted synchronously at admission time.
//!
//! There is no background poller: the queue asks its [`HeapProbe`] for a
//! reading whenever it evaluates admission or records high-water marks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

/// Source of heap usage readings.
pub trait HeapProbe: Send + Sync {
    /// Current heap usage in bytes, when measurable.
    fn heap_used(&self) -> Option<u64>;

    /// Heap ceiling in bytes. `None` disables heap-pressure throttling.
    fn heap_limit(&self) -> Option<u64>;
}

/// Result of comparing a heap reading against the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeapPressure {
    pub active: bool,
    /// Multiplier applied to every limit; `1.0` when inactive, floored at `0.1`.
    pub factor: f64,
    pub heap_used: u64,
    pub heap_ratio: f64,
}

impl HeapPressure {
    pub const NONE: Self = Self {
        active: false,
        factor: 1.0,
        heap_used: 0,
        heap_ratio: 0.0,
    };

    /// Evaluate pressure for a reading against `limit` and `max_fraction`.
    ///
    /// Over the threshold, the factor shrinks linearly with how far usage has
    /// climbed towards the full ceiling.
    pub fn evaluate(heap_used: u64, limit: Option<u64>, max_fraction: f64) -> Self {
        let Some(limit) = limit.filter(|l| *l > 0) else {
            return Self::NONE;
        };
        if !(max_fraction > 0.0 && max_fraction < 1.0) {
            return Self::NONE;
        }
        let heap_ratio = heap_used as f64 / limit as f64;
        if !heap_ratio.is_finite() || heap_ratio < max_fraction {
            return Self {
                heap_used,
                heap_ratio,
                ..Self::NONE
            };
        }
        let over = ((heap_ratio - max_fraction) / (1.0 - max_fraction)).min(1.0);
        Self {
            active: true,
            factor: (1.0 - over).max(0.1),
            heap_used,
            heap_ratio,
        }
    }

    /// Scale a limit by the pressure factor, never below one unit.
    pub fn scale(&self, limit: Option<u64>) -> Option<u64> {
        if !self.active {
            return limit;
        }
        limit.map(|l| ((l as f64 * self.factor).floor() as u64).max(1))
    }
}

// ── System probe ────────────────────────────────────────────────────

/// Minimum time between two sysinfo refreshes.
const SYSTEM_REFRESH_INTERVAL: Duration = Duration::from_millis(250);

/// Process resident memory measured against total physical memory.
pub struct SystemHeapProbe {
    inner: Mutex<SystemProbeState>,
    total_memory: Option<u64>,
}

struct SystemProbeState {
    system: System,
    last_refresh: Option<Instant>,
    last_used: Option<u64>,
}

impl std::fmt::Debug for SystemHeapProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemHeapProbe")
            .field("total_memory", &self.total_memory)
            .finish_non_exhaustive()
    }
}

impl Default for SystemHeapProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemHeapProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let total = system.total_memory();
        Self {
            inner: Mutex::new(SystemProbeState {
                system,
                last_refresh: None,
                last_used: None,
            }),
            total_memory: (total > 0).then_some(total),
        }
    }
}

impl HeapProbe for SystemHeapProbe {
    fn heap_used(&self) -> Option<u64> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh = state
            .last_refresh
            .is_some_and(|at| at.elapsed() < SYSTEM_REFRESH_INTERVAL);
        if fresh {
            return state.last_used;
        }
        let pid = sysinfo::get_current_pid().ok()?;
        state.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        let used = state.system.process(pid).map(sysinfo::Process::memory);
        state.last_refresh = Some(Instant::now());
        state.last_used = used;
        used
    }

    fn heap_limit(&self) -> Option<u64> {
        self.total_memory
    }
}

// ── Fixed probe ─────────────────────────────────────────────────────

/// Probe with externally controlled readings.
///
/// Useful when the embedding runtime already tracks its own heap, and in tests.
#[derive(Debug, Default)]
pub struct FixedHeapProbe {
    used: AtomicU64,
    limit: Option<u64>,
}

impl FixedHeapProbe {
    pub fn new(limit: u64, used: u64) -> Self {
        Self {
            used: AtomicU64::new(used),
            limit: Some(limit),
        }
    }

    /// A probe without a ceiling: heap pressure never engages.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn set_used(&self, used: u64) {
        self.used.store(used, Ordering::Relaxed);
    }
}

impl HeapProbe for FixedHeapProbe {
    fn heap_used(&self) -> Option<u64> {
        Some(self.used.load(Ordering::Relaxed))
    }

    fn heap_limit(&self) -> Option<u64> {
        self.limit
    }
}
