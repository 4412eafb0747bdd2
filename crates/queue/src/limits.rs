//! Queue construction options and the limits resolved from them.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use flowgate_core::coerce::{clamped_fraction, from_u64, positive_int};
use flowgate_core::{LogSink, QueueConfig};

use crate::heap::HeapProbe;

/// Heap fraction used when none (or zero) is configured.
pub const DEFAULT_MAX_HEAP_FRACTION: f64 = 0.8;

/// Pending totals handed to the change callback after every reserve/release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSnapshot {
    pub pending_count: u64,
    pub pending_rows: u64,
    pub pending_bytes: u64,
}

/// Callback fired with the pending totals after each state change.
pub type OnChange = Arc<dyn Fn(PendingSnapshot) + Send + Sync>;

/// Limits resolved once at queue construction. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueLimits {
    pub max_pending: Option<u64>,
    pub max_pending_rows: Option<u64>,
    pub max_pending_bytes: Option<u64>,
    /// Values `>= 1` disable heap-pressure throttling.
    pub max_heap_fraction: f64,
}

impl QueueLimits {
    /// Resolve raw inputs: non-positive counts read as unbounded, a missing or
    /// zero heap fraction falls back to [`DEFAULT_MAX_HEAP_FRACTION`].
    pub fn resolve(
        max_pending: Option<f64>,
        max_pending_rows: Option<f64>,
        max_pending_bytes: Option<f64>,
        max_heap_fraction: Option<f64>,
    ) -> Self {
        Self {
            max_pending: positive_int(max_pending),
            max_pending_rows: positive_int(max_pending_rows),
            max_pending_bytes: positive_int(max_pending_bytes),
            max_heap_fraction: clamped_fraction(max_heap_fraction, 0.0, 1.0, false)
                .unwrap_or(DEFAULT_MAX_HEAP_FRACTION),
        }
    }

    pub fn unbounded() -> Self {
        Self::resolve(None, None, None, None)
    }
}

/// Options accepted by [`BackpressureQueue::new`](crate::BackpressureQueue::new).
#[derive(Clone, Default)]
pub struct QueueOptions {
    pub max_pending: Option<f64>,
    pub max_pending_rows: Option<f64>,
    pub max_pending_bytes: Option<f64>,
    pub max_heap_fraction: Option<f64>,
    pub on_change: Option<OnChange>,
    pub log: Option<LogSink>,
    /// Heap telemetry; defaults to [`SystemHeapProbe`](crate::SystemHeapProbe).
    pub heap_probe: Option<Arc<dyn HeapProbe>>,
}

impl fmt::Debug for QueueOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueOptions")
            .field("max_pending", &self.max_pending)
            .field("max_pending_rows", &self.max_pending_rows)
            .field("max_pending_bytes", &self.max_pending_bytes)
            .field("max_heap_fraction", &self.max_heap_fraction)
            .field("on_change", &self.on_change.is_some())
            .field("log", &self.log.is_some())
            .field("heap_probe", &self.heap_probe.is_some())
            .finish()
    }
}

impl QueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options from the `[queue]` config section.
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_pending: from_u64(config.max_pending),
            max_pending_rows: from_u64(config.max_pending_rows),
            max_pending_bytes: from_u64(config.max_pending_bytes),
            max_heap_fraction: config.max_heap_fraction,
            ..Self::default()
        }
    }

    pub fn max_pending(mut self, value: u64) -> Self {
        self.max_pending = Some(value as f64);
        self
    }

    pub fn max_pending_rows(mut self, value: u64) -> Self {
        self.max_pending_rows = Some(value as f64);
        self
    }

    pub fn max_pending_bytes(mut self, value: u64) -> Self {
        self.max_pending_bytes = Some(value as f64);
        self
    }

    pub fn max_heap_fraction(mut self, value: f64) -> Self {
        self.max_heap_fraction = Some(value);
        self
    }

    pub fn on_change(mut self, callback: impl Fn(PendingSnapshot) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(callback));
        self
    }

    pub fn log(mut self, sink: LogSink) -> Self {
        self.log = Some(sink);
        self
    }

    pub fn heap_probe(mut self, probe: Arc<dyn HeapProbe>) -> Self {
        self.heap_probe = Some(probe);
        self
    }

    pub fn limits(&self) -> QueueLimits {
        QueueLimits::resolve(
            self.max_pending,
            self.max_pending_rows,
            self.max_pending_bytes,
            self.max_heap_fraction,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_limits_are_unbounded_with_default_heap_fraction() {
        let limits = QueueLimits::unbounded();
        assert_eq!(limits.max_pending, None);
        assert_eq!(limits.max_pending_rows, None);
        assert_eq!(limits.max_pending_bytes, None);
        assert_eq!(limits.max_heap_fraction, DEFAULT_MAX_HEAP_FRACTION);
    }

    #[test]
    fn non_positive_limits_read_as_unbounded() {
        let limits = QueueLimits::resolve(Some(0.0), Some(-3.0), Some(0.4), Some(0.0));
        assert_eq!(limits.max_pending, None);
        assert_eq!(limits.max_pending_rows, None);
        assert_eq!(limits.max_pending_bytes, None);
        assert_eq!(limits.max_heap_fraction, DEFAULT_MAX_HEAP_FRACTION);
    }

    #[test]
    fn heap_fraction_clamps_to_one() {
        let limits = QueueLimits::resolve(Some(4.0), None, None, Some(3.0));
        assert_eq!(limits.max_pending, Some(4));
        assert_eq!(limits.max_heap_fraction, 1.0);
    }

    #[test]
    fn from_config_maps_every_field() {
        let config = QueueConfig {
            max_pending: Some(8),
            max_pending_rows: Some(100),
            max_pending_bytes: Some(4096),
            max_heap_fraction: Some(0.6),
        };
        let limits = QueueOptions::from_config(&config).limits();
        assert_eq!(limits.max_pending, Some(8));
        assert_eq!(limits.max_pending_rows, Some(100));
        assert_eq!(limits.max_pending_bytes, Some(4096));
        assert_eq!(limits.max_heap_fraction, 0.6);
    }
}
