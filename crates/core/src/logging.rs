//! Logging plumbing shared by the flow-control crates.
//!
//! Diagnostic lines (`[perf] ...`, `[postings] ...`) go to a caller-supplied
//! [`LogSink`] when one is configured and to `tracing` otherwise.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Caller-supplied sink for human-readable diagnostic lines.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Install the global `tracing` subscriber.
///
/// Honors `RUST_LOG`, falling back to `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Send a line to the sink, or to `tracing::warn!` when there is none.
pub fn emit_line(sink: Option<&LogSink>, line: &str) {
    match sink {
        Some(sink) => sink(line),
        None => tracing::warn!("{line}"),
    }
}

/// Allows at most one emission per key per fixed wall-clock interval.
///
/// Keys name call sites, not events: every event from the same site shares
/// one budget.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Mutex<HashMap<&'static str, Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` (and arms the interval) when `key` may emit now.
    pub fn allow(&self, key: &'static str) -> bool {
        self.allow_at(key, Instant::now())
    }

    pub fn allow_at(&self, key: &'static str, now: Instant) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match last.get(key) {
            Some(prev) if now.saturating_duration_since(*prev) < self.interval => false,
            _ => {
                last.insert(key, now);
                true
            }
        }
    }
}
