//! Utilization alarms evaluated at every stage checkpoint.
//!
//! Each alarm walks normal → under-target → alerted. The sustained alarms
//! only start their window on the first under-target sample and restart it
//! the moment a sample recovers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::checkpoint::CheckpointRecord;
use crate::types::{QueueActivity, UtilizationSample, HEAVY_UTILIZATION_STAGES};

const LOW_UTILIZATION: f64 = 0.35;
const LOW_UTILIZATION_MIN_PENDING: u64 = 64;
const SUSTAINED_MIN_PENDING: u64 = 16;
const QUEUE_MIN_DEMAND: u64 = 4;

pub const UTILIZATION_BREACH_STEP: &str = "utilization-target-breach";
pub const QUEUE_UTILIZATION_BREACH_STEP: &str = "queue-utilization-target-breach";

/// An alarm raised by a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Alarm {
    LowUtilization {
        sample: UtilizationSample,
    },
    SustainedBelowTarget {
        sample: UtilizationSample,
        target: f64,
        duration: Duration,
    },
    QueueBelowTarget {
        queue: String,
        utilization: f64,
        target: f64,
        pending: u64,
        running: u64,
        duration: Duration,
    },
}

impl Alarm {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LowUtilization { .. } => "low-utilization",
            Self::SustainedBelowTarget { .. } => "sustained-below-target",
            Self::QueueBelowTarget { .. } => "queue-below-target",
        }
    }

    /// Diagnostic line for an alarm raised at `location` (`stage[/step]`).
    pub fn log_line(&self, location: &str) -> String {
        match self {
            Self::LowUtilization { sample } => format!(
                "[perf] scheduler under-utilization detected at {location}: utilization={:.2}, pending={}, tokens(cpu={}, io={}).",
                sample.utilization,
                sample.pending,
                sample.cpu_tokens.floor(),
                sample.io_tokens.floor()
            ),
            Self::SustainedBelowTarget {
                sample,
                target,
                duration,
            } => {
                let seconds = ((duration.as_millis() as f64 / 1000.0).round() as u64).max(1);
                format!(
                    "[perf] sustained scheduler utilization below target at {location}: utilization={:.2}, target={target:.2}, pending={}, duration={seconds}s.",
                    sample.utilization, sample.pending
                )
            }
            Self::QueueBelowTarget {
                queue,
                utilization,
                target,
                pending,
                running,
                duration,
            } => format!(
                "[perf] sustained queue utilization below target at {location}: queue={queue}, utilization={utilization:.2}, target={target:.2}, pending={pending}, running={running}, durationMs={}.",
                duration.as_millis()
            ),
        }
    }

    /// Structured checkpoint for the sustained alarms; the one-shot warning has none.
    pub fn checkpoint(&self, location: &str) -> Option<CheckpointRecord> {
        match self {
            Self::LowUtilization { .. } => None,
            Self::SustainedBelowTarget {
                sample,
                target,
                duration,
            } => Some(
                CheckpointRecord::new("scheduler")
                    .step(UTILIZATION_BREACH_STEP)
                    .label(location)
                    .extra(object(json!({
                        "utilization": sample.utilization,
                        "target": target,
                        "pending": sample.pending,
                        "durationMs": duration.as_millis() as u64,
                    }))),
            ),
            Self::QueueBelowTarget {
                queue,
                utilization,
                target,
                pending,
                running,
                duration,
            } => Some(
                CheckpointRecord::new("scheduler")
                    .step(QUEUE_UTILIZATION_BREACH_STEP)
                    .label(format!("{location}:{queue}"))
                    .extra(object(json!({
                        "queue": queue,
                        "utilization": utilization,
                        "target": target,
                        "pending": pending,
                        "running": running,
                        "durationMs": duration.as_millis() as u64,
                    }))),
            ),
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ── Low-utilization one-shot ────────────────────────────────────────

/// Latch for the one-shot low-utilization warning.
///
/// Clones share the latch, so monitors built from one latch warn at most once
/// between them. Monitors use [`LowUtilizationLatch::process`] unless given
/// their own.
#[derive(Debug, Clone, Default)]
pub struct LowUtilizationLatch(Arc<AtomicBool>);

impl LowUtilizationLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latch shared by every monitor in this process.
    pub fn process() -> Self {
        static PROCESS: OnceLock<LowUtilizationLatch> = OnceLock::new();
        PROCESS.get_or_init(Self::new).clone()
    }

    pub fn fired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Deep backlog with low utilization; trips the latch on the first hit.
    pub fn check(&self, sample: &UtilizationSample) -> Option<Alarm> {
        if self.fired() {
            return None;
        }
        if sample.pending < LOW_UTILIZATION_MIN_PENDING.max(sample.token_budget.saturating_mul(4)) {
            return None;
        }
        if sample.utilization >= LOW_UTILIZATION {
            return None;
        }
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Alarm::LowUtilization { sample: *sample })
    }
}

// ── Sustained scheduler alarm ───────────────────────────────────────

/// Whether `stage[/step]` is held to the utilization target. The step name
/// takes precedence when present.
pub fn is_heavy_stage(stage: &str, step: Option<&str>) -> bool {
    let name = step.filter(|s| !s.is_empty()).unwrap_or(stage).to_lowercase();
    HEAVY_UTILIZATION_STAGES.contains(&name.as_str())
}

#[derive(Debug, Default)]
pub struct SustainedAlarm {
    under_since: Option<Instant>,
    fired: bool,
}

impl SustainedAlarm {
    pub fn under_since(&self) -> Option<Instant> {
        self.under_since
    }

    pub fn observe(
        &mut self,
        heavy_stage: bool,
        sample: Option<&UtilizationSample>,
        target: f64,
        window: Duration,
        now: Instant,
    ) -> Option<Alarm> {
        let Some(sample) = sample.filter(|s| {
            heavy_stage && s.pending >= SUSTAINED_MIN_PENDING.max(s.token_budget.saturating_mul(2)) && s.utilization < target
        }) else {
            self.under_since = None;
            return None;
        };
        let Some(since) = self.under_since else {
            self.under_since = Some(now);
            return None;
        };
        if self.fired {
            return None;
        }
        let duration = now.saturating_duration_since(since);
        if duration < window {
            return None;
        }
        self.fired = true;
        Some(Alarm::SustainedBelowTarget {
            sample: *sample,
            target,
            duration,
        })
    }
}

// ── Per-queue alarm ─────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct QueueAlarms {
    under_since: HashMap<String, Instant>,
    fired: HashSet<String>,
}

impl QueueAlarms {
    pub fn is_tracking(&self, queue: &str) -> bool {
        self.under_since.contains_key(queue)
    }

    pub fn observe(
        &mut self,
        stage: &str,
        queues: &BTreeMap<String, QueueActivity>,
        target: f64,
        window: Duration,
        now: Instant,
    ) -> Vec<Alarm> {
        let stage = if stage.is_empty() { "unknown" } else { stage };
        let mut alarms = Vec::new();
        for (name, activity) in queues {
            let fired_key = format!("{stage}:{name}");
            let demand = activity.demand();
            let utilization = activity.running as f64 / demand.max(1) as f64;
            if name.is_empty() || demand < QUEUE_MIN_DEMAND || utilization >= target {
                self.under_since.remove(name);
                self.fired.remove(&fired_key);
                continue;
            }
            let since = *self.under_since.entry(name.clone()).or_insert(now);
            let duration = now.saturating_duration_since(since);
            if duration < window || !self.fired.insert(fired_key) {
                continue;
            }
            alarms.push(Alarm::QueueBelowTarget {
                queue: name.clone(),
                utilization,
                target,
                pending: activity.pending,
                running: activity.running,
                duration,
            });
        }
        alarms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(15);

    fn sample(utilization: f64, pending: u64) -> UtilizationSample {
        UtilizationSample {
            utilization,
            pending,
            cpu_tokens: 4.0,
            io_tokens: 4.0,
            token_budget: 8,
        }
    }

    fn queues(entries: &[(&str, u64, u64)]) -> BTreeMap<String, QueueActivity> {
        entries
            .iter()
            .map(|(name, pending, running)| {
                (
                    name.to_string(),
                    QueueActivity {
                        pending: *pending,
                        running: *running,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn low_utilization_fires_once_across_clones() {
        let latch = LowUtilizationLatch::new();
        let other = latch.clone();
        assert!(latch.check(&sample(0.2, 63)).is_none());
        assert!(latch.check(&sample(0.35, 100)).is_none());
        assert!(latch.check(&sample(0.2, 64)).is_some());
        assert!(other.fired());
        assert!(other.check(&sample(0.1, 1000)).is_none());
    }

    #[test]
    fn process_latch_is_shared() {
        let a = LowUtilizationLatch::process();
        let b = LowUtilizationLatch::process();
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn low_utilization_threshold_scales_with_budget() {
        let latch = LowUtilizationLatch::new();
        let big_budget = UtilizationSample {
            token_budget: 20,
            ..sample(0.1, 70)
        };
        assert!(latch.check(&big_budget).is_none());
        assert!(latch.check(&UtilizationSample { pending: 80, ..big_budget }).is_some());
    }

    #[test]
    fn huge_token_budget_never_alarms() {
        let huge = UtilizationSample {
            token_budget: u64::MAX,
            ..sample(0.1, 100)
        };
        assert!(LowUtilizationLatch::new().check(&huge).is_none());
        let mut alarm = SustainedAlarm::default();
        assert!(alarm.observe(true, Some(&huge), 0.75, WINDOW, Instant::now()).is_none());
        assert!(alarm.under_since().is_none());
    }

    #[test]
    fn heavy_stage_names() {
        assert!(is_heavy_stage("Postings", None));
        assert!(is_heavy_stage("stage2", Some("write")));
        assert!(!is_heavy_stage("write", Some("flush")));
        assert!(is_heavy_stage("relations", Some("")));
        assert!(!is_heavy_stage("discovery", None));
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_alarm_waits_for_window() {
        let mut alarm = SustainedAlarm::default();
        let low = sample(0.5, 40);
        assert!(alarm.observe(true, Some(&low), 0.75, WINDOW, Instant::now()).is_none());
        assert!(alarm.under_since().is_some());

        tokio::time::advance(Duration::from_secs(14)).await;
        assert!(alarm.observe(true, Some(&low), 0.75, WINDOW, Instant::now()).is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        match alarm.observe(true, Some(&low), 0.75, WINDOW, Instant::now()) {
            Some(Alarm::SustainedBelowTarget { duration, .. }) => assert_eq!(duration, WINDOW),
            other => panic!("expected sustained alarm, got {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(alarm.observe(true, Some(&low), 0.75, WINDOW, Instant::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_alarm_resets_on_recovery() {
        let mut alarm = SustainedAlarm::default();
        let low = sample(0.5, 40);
        alarm.observe(true, Some(&low), 0.75, WINDOW, Instant::now());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(alarm.observe(true, Some(&sample(0.8, 40)), 0.75, WINDOW, Instant::now()).is_none());
        assert!(alarm.under_since().is_none());

        // backlog too small also resets
        alarm.observe(true, Some(&low), 0.75, WINDOW, Instant::now());
        tokio::time::advance(Duration::from_secs(10)).await;
        alarm.observe(true, Some(&sample(0.5, 15)), 0.75, WINDOW, Instant::now());
        assert!(alarm.under_since().is_none());

        // non-heavy stage resets
        alarm.observe(true, Some(&low), 0.75, WINDOW, Instant::now());
        alarm.observe(false, Some(&low), 0.75, WINDOW, Instant::now());
        assert!(alarm.under_since().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn queue_alarm_per_queue_window() {
        let mut alarms = QueueAlarms::default();
        let busy = queues(&[("io", 8, 1), ("cpu", 2, 6), ("tiny", 2, 0)]);
        assert!(alarms.observe("write", &busy, 0.75, WINDOW, Instant::now()).is_empty());
        assert!(alarms.is_tracking("io"));
        assert!(!alarms.is_tracking("cpu"));
        assert!(!alarms.is_tracking("tiny"));

        tokio::time::advance(WINDOW).await;
        let fired = alarms.observe("write", &busy, 0.75, WINDOW, Instant::now());
        assert_eq!(fired.len(), 1);
        assert_eq!(
            fired[0].log_line("write"),
            "[perf] sustained queue utilization below target at write: queue=io, utilization=0.11, target=0.75, pending=8, running=1, durationMs=15000."
        );

        // fires once per stage, again under a new stage
        assert!(alarms.observe("write", &busy, 0.75, WINDOW, Instant::now()).is_empty());
        assert_eq!(alarms.observe("postings", &busy, 0.75, WINDOW, Instant::now()).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_alarm_rearms_after_recovery() {
        let mut alarms = QueueAlarms::default();
        let busy = queues(&[("io", 8, 1)]);
        alarms.observe("write", &busy, 0.75, WINDOW, Instant::now());
        tokio::time::advance(WINDOW).await;
        assert_eq!(alarms.observe("write", &busy, 0.75, WINDOW, Instant::now()).len(), 1);

        alarms.observe("write", &queues(&[("io", 1, 1)]), 0.75, WINDOW, Instant::now());
        assert!(!alarms.is_tracking("io"));

        alarms.observe("write", &busy, 0.75, WINDOW, Instant::now());
        tokio::time::advance(WINDOW).await;
        assert_eq!(alarms.observe("write", &busy, 0.75, WINDOW, Instant::now()).len(), 1);
    }

    #[test]
    fn alarm_lines_and_checkpoints() {
        let low = Alarm::LowUtilization {
            sample: UtilizationSample {
                cpu_tokens: 4.7,
                ..sample(0.123, 90)
            },
        };
        assert_eq!(
            low.log_line("postings/flush"),
            "[perf] scheduler under-utilization detected at postings/flush: utilization=0.12, pending=90, tokens(cpu=4, io=4)."
        );
        assert!(low.checkpoint("postings").is_none());

        let sustained = Alarm::SustainedBelowTarget {
            sample: sample(0.5, 40),
            target: 0.75,
            duration: Duration::from_millis(15_400),
        };
        assert_eq!(
            sustained.log_line("write"),
            "[perf] sustained scheduler utilization below target at write: utilization=0.50, target=0.75, pending=40, duration=15s."
        );
        let record = sustained.checkpoint("write").unwrap();
        assert_eq!(record.stage, "scheduler");
        assert_eq!(record.step.as_deref(), Some(UTILIZATION_BREACH_STEP));
        assert_eq!(record.label.as_deref(), Some("write"));
        assert_eq!(record.extra["durationMs"], 15_400);
    }
}
