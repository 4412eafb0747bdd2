//! Adaptive artifact-write concurrency.
//!
//! The controller is driven by the write pool: once per dispatch cycle the
//! pool reports a [`WriteSignals`] snapshot and gets back the concurrency to
//! use. At most one step is taken per observation, and each direction has its
//! own cooldown.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use flowgate_core::{emit_line, LogSink};

use crate::config::{AdaptiveWriteConfig, WriteDispatchConfig};

const MEMORY_PRESSURE_HIGH: f64 = 0.9;
const MEMORY_PRESSURE_LOW: f64 = 0.62;
const GC_PRESSURE_HIGH: f64 = 0.4;
const GC_PRESSURE_LOW: f64 = 0.2;

const WRITE_QUEUE_PENDING_THRESHOLD: u64 = 1;
const WRITE_QUEUE_OLDEST_WAIT_MS_THRESHOLD: u64 = 1200;
const WRITE_QUEUE_WAIT_P95_MS_THRESHOLD: u64 = 750;

/// Observed write-path state for one dispatch cycle.
///
/// Pressure values are fractions in `[0, 1]`; out-of-range values are clamped
/// and non-finite values read as absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteSignals {
    pub pending_writes: u64,
    pub active_writes: u64,
    pub longest_stall_sec: f64,
    pub memory_pressure: Option<f64>,
    pub gc_pressure: Option<f64>,
    pub rss_utilization: Option<f64>,
    pub scheduler_write_pending: Option<u64>,
    pub scheduler_write_oldest_wait_ms: Option<u64>,
    pub scheduler_write_wait_p95_ms: Option<u64>,
}

impl WriteSignals {
    fn normalized(mut self) -> Self {
        let fraction = |v: Option<f64>| v.filter(|v| v.is_finite()).map(|v| v.clamp(0.0, 1.0));
        self.longest_stall_sec = if self.longest_stall_sec.is_finite() {
            self.longest_stall_sec.max(0.0)
        } else {
            0.0
        };
        self.memory_pressure = fraction(self.memory_pressure);
        self.gc_pressure = fraction(self.gc_pressure);
        self.rss_utilization = fraction(self.rss_utilization);
        self
    }

    fn has_scheduler_signals(&self) -> bool {
        self.scheduler_write_pending.is_some()
            || self.scheduler_write_oldest_wait_ms.is_some()
            || self.scheduler_write_wait_p95_ms.is_some()
    }

    fn high_memory_pressure(&self) -> bool {
        self.memory_pressure.is_some_and(|v| v >= MEMORY_PRESSURE_HIGH)
            || self.gc_pressure.is_some_and(|v| v >= GC_PRESSURE_HIGH)
            || self.rss_utilization.is_some_and(|v| v >= MEMORY_PRESSURE_HIGH)
    }

    fn low_memory_pressure(&self) -> bool {
        self.memory_pressure.map_or(true, |v| v <= MEMORY_PRESSURE_LOW)
            && self.gc_pressure.map_or(true, |v| v <= GC_PRESSURE_LOW)
            && self.rss_utilization.map_or(true, |v| v <= MEMORY_PRESSURE_LOW)
    }
}

/// Where an observed stall is attributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StallAttribution {
    None,
    WriteQueue,
    NonWrite,
    Unknown,
}

impl StallAttribution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::WriteQueue => "write-queue",
            Self::NonWrite => "non-write",
            Self::Unknown => "unknown",
        }
    }
}

/// Why the controller changed concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeReason {
    MemoryPressure,
    Stall,
    Drain,
    Backlog,
    MemoryHeadroom,
}

impl ChangeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MemoryPressure => "memory-pressure",
            Self::Stall => "stall",
            Self::Drain => "drain",
            Self::Backlog => "backlog",
            Self::MemoryHeadroom => "memory-headroom",
        }
    }
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concurrency change and the signals that caused it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrencyChange {
    pub reason: ChangeReason,
    pub from: u64,
    pub to: u64,
    #[serde(flatten)]
    pub signals: WriteSignals,
    pub stall_attribution: StallAttribution,
}

impl ConcurrencyChange {
    /// The `[perf] adaptive artifact write concurrency ...` status line.
    pub fn log_line(&self) -> String {
        let s = &self.signals;
        let stall = if s.longest_stall_sec > 0.0 {
            format!(", stall={}s", s.longest_stall_sec)
        } else {
            String::new()
        };
        let memory = if s.memory_pressure.is_some() || s.gc_pressure.is_some() || s.rss_utilization.is_some() {
            let fmt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"));
            format!(
                ", mem={}, gc={}, rss={}",
                fmt(s.memory_pressure),
                fmt(s.gc_pressure),
                fmt(s.rss_utilization)
            )
        } else {
            String::new()
        };
        format!(
            "[perf] adaptive artifact write concurrency {} -> {} ({}, pending={}{stall}{memory})",
            self.from, self.to, self.reason, s.pending_writes
        )
    }
}

pub type OnConcurrencyChange = Arc<dyn Fn(&ConcurrencyChange) + Send + Sync>;

/// Inclusive concurrency bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConcurrencyLimits {
    pub min: u64,
    pub max: u64,
}

/// Starting concurrency before the controller clamps it.
///
/// Disabled adaptation runs at the cap. An explicit start override wins; an
/// explicit write-concurrency override starts at the cap; otherwise start near
/// 60% of the cap, never below `min`.
pub fn initial_concurrency(
    enabled: bool,
    write_concurrency: u64,
    min_concurrency: u64,
    start_override: Option<u64>,
    concurrency_override: bool,
) -> u64 {
    let cap = write_concurrency.max(1);
    if !enabled {
        return cap;
    }
    match start_override.filter(|v| *v > 0) {
        Some(start) => start,
        None if concurrency_override => cap,
        None => min_concurrency.max(1).max((cap as f64 * 0.6).ceil() as u64),
    }
}

pub struct AdaptiveConcurrencyController {
    limits: ConcurrencyLimits,
    current: u64,
    params: AdaptiveWriteConfig,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
    on_change: Option<OnConcurrencyChange>,
    log: Option<LogSink>,
}

impl fmt::Debug for AdaptiveConcurrencyController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveConcurrencyController")
            .field("limits", &self.limits)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl AdaptiveConcurrencyController {
    /// Controller bounded by `[params.min_concurrency, max_concurrency]`.
    ///
    /// `initial` defaults to `ceil(0.6 * max)` and is clamped into bounds.
    pub fn new(max_concurrency: u64, initial: Option<u64>, params: AdaptiveWriteConfig) -> Self {
        let max = max_concurrency.max(1);
        let min = params.min_concurrency.max(1).min(max);
        let fallback = min.max(max.min((max as f64 * 0.6).ceil() as u64));
        let current = initial.filter(|v| *v > 0).unwrap_or(fallback).clamp(min, max);
        Self {
            limits: ConcurrencyLimits { min, max },
            current,
            params,
            last_scale_up: None,
            last_scale_down: None,
            on_change: None,
            log: None,
        }
    }

    pub fn with_on_change(mut self, on_change: OnConcurrencyChange) -> Self {
        self.on_change = Some(on_change);
        self
    }

    pub fn with_log(mut self, log: LogSink) -> Self {
        self.log = Some(log);
        self
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn limits(&self) -> ConcurrencyLimits {
        self.limits
    }

    pub fn observe(&mut self, signals: WriteSignals) -> u64 {
        self.observe_at(signals, Instant::now())
    }

    /// Observe `signals` at `now`, step at most once, and return the concurrency.
    pub fn observe_at(&mut self, signals: WriteSignals, now: Instant) -> u64 {
        let s = signals.normalized();
        let attributed = self.attributed_to_write_queue(&s);
        let attribution = if s.longest_stall_sec <= 0.0 {
            StallAttribution::None
        } else if attributed {
            StallAttribution::WriteQueue
        } else if s.has_scheduler_signals() {
            StallAttribution::NonWrite
        } else {
            StallAttribution::Unknown
        };

        let p = &self.params;
        let backlog_per_slot = s.pending_writes as f64 / self.current.max(1) as f64;
        let cooled = |last: Option<Instant>, cooldown_ms: u64| {
            last.map_or(true, |at| now.saturating_duration_since(at) >= Duration::from_millis(cooldown_ms))
        };

        let can_scale_down = self.current > self.limits.min && cooled(self.last_scale_down, p.scale_down_cooldown_ms);
        let down = if !can_scale_down {
            None
        } else if s.high_memory_pressure() {
            Some((ChangeReason::MemoryPressure, 1))
        } else if s.pending_writes > 0 && s.longest_stall_sec >= p.stall_scale_down_seconds as f64 && attributed {
            Some((ChangeReason::Stall, if self.severe_queue_stall(&s) { 2 } else { 1 }))
        } else if s.pending_writes <= 1
            && s.active_writes < self.current
            && backlog_per_slot <= p.scale_down_backlog_per_slot
        {
            Some((ChangeReason::Drain, 1))
        } else {
            None
        };
        if let Some((reason, step)) = down {
            let to = self.current.saturating_sub(step).max(self.limits.min);
            self.last_scale_down = Some(now);
            self.apply(reason, to, s, attribution);
            return self.current;
        }

        let can_scale_up = self.current < self.limits.max && cooled(self.last_scale_up, p.scale_up_cooldown_ms);
        let guard = p.stall_scale_up_guard_seconds as f64;
        let up = if !can_scale_up || s.pending_writes == 0 {
            None
        } else if backlog_per_slot >= p.scale_up_backlog_per_slot && s.longest_stall_sec <= guard {
            Some(ChangeReason::Backlog)
        } else if s.low_memory_pressure()
            && backlog_per_slot >= (p.scale_up_backlog_per_slot * 0.6).max(0.75)
            && s.longest_stall_sec <= (guard * 0.75).max(1.0)
        {
            Some(ChangeReason::MemoryHeadroom)
        } else {
            None
        };
        if let Some(reason) = up {
            self.last_scale_up = Some(now);
            self.apply(reason, self.current + 1, s, attribution);
        }
        self.current
    }

    fn attributed_to_write_queue(&self, s: &WriteSignals) -> bool {
        if s.has_scheduler_signals() {
            s.scheduler_write_pending.is_some_and(|v| v >= WRITE_QUEUE_PENDING_THRESHOLD)
                && (s.scheduler_write_oldest_wait_ms.is_some_and(|v| v >= WRITE_QUEUE_OLDEST_WAIT_MS_THRESHOLD)
                    || s.scheduler_write_wait_p95_ms.is_some_and(|v| v >= WRITE_QUEUE_WAIT_P95_MS_THRESHOLD))
        } else {
            s.pending_writes > 0 && s.active_writes >= self.current.saturating_sub(1).max(1)
        }
    }

    fn severe_queue_stall(&self, s: &WriteSignals) -> bool {
        let pending_floor = (WRITE_QUEUE_PENDING_THRESHOLD + 1).max((self.current as f64 * 0.75).ceil() as u64);
        let wait_floor = (WRITE_QUEUE_OLDEST_WAIT_MS_THRESHOLD * 2).max(4000);
        match (s.scheduler_write_pending, s.scheduler_write_oldest_wait_ms) {
            (Some(pending), Some(oldest)) => pending >= pending_floor && oldest >= wait_floor,
            _ => false,
        }
    }

    fn apply(&mut self, reason: ChangeReason, to: u64, signals: WriteSignals, attribution: StallAttribution) {
        let from = self.current;
        self.current = to;
        if from == to {
            return;
        }
        let change = ConcurrencyChange {
            reason,
            from,
            to,
            signals,
            stall_attribution: attribution,
        };
        debug!(from, to, reason = reason.as_str(), attribution = attribution.as_str(), "write concurrency changed");
        if let Some(on_change) = &self.on_change {
            on_change(&change);
        }
        emit_line(self.log.as_ref(), &change.log_line());
    }
}

impl WriteDispatchConfig {
    /// Controller for a pool capped at `write_concurrency`, or `None` when
    /// adaptation is disabled.
    pub fn concurrency_controller(
        &self,
        write_concurrency: u64,
        concurrency_override: bool,
    ) -> Option<AdaptiveConcurrencyController> {
        if !self.adaptive.enabled {
            return None;
        }
        let initial = initial_concurrency(
            true,
            write_concurrency,
            self.adaptive.min_concurrency,
            self.adaptive.start_concurrency_override,
            concurrency_override,
        );
        Some(AdaptiveConcurrencyController::new(
            write_concurrency,
            Some(initial),
            self.adaptive.clone(),
        ))
    }
}
