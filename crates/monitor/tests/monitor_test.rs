//! Checkpoint recording and utilization alarms of the monitor.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowgate_core::LogSink;
use flowgate_monitor::*;
use serde_json::{json, Map};

struct NoHost;

impl HostSampler for NoHost {
    fn sample(&self) -> HostSample {
        HostSample::default()
    }
}

/// Scheduler whose stats the test rewrites between checkpoints.
#[derive(Default)]
struct ScriptedScheduler {
    stats: Mutex<Option<SchedulerStats>>,
    options: Mutex<Vec<TelemetryOptions>>,
}

impl ScriptedScheduler {
    fn set(&self, value: serde_json::Value) {
        *self.stats.lock().unwrap() = Some(serde_json::from_value(value).unwrap());
    }
}

impl SchedulerStatsSource for ScriptedScheduler {
    fn stats(&self) -> Option<SchedulerStats> {
        self.stats.lock().unwrap().clone()
    }

    fn set_telemetry_options(&self, options: TelemetryOptions) {
        self.options.lock().unwrap().push(options);
    }
}

struct Harness {
    monitor: UtilizationMonitor,
    scheduler: Arc<ScriptedScheduler>,
    sink: Arc<MemoryCheckpointSink>,
    lines: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn new(settings: MonitorSettings) -> Self {
        Self::with_latch(settings, LowUtilizationLatch::new())
    }

    fn with_latch(settings: MonitorSettings, latch: LowUtilizationLatch) -> Self {
        let scheduler = Arc::new(ScriptedScheduler::default());
        let sink = Arc::new(MemoryCheckpointSink::new());
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&lines);
        let log: LogSink = Arc::new(move |line: &str| captured.lock().unwrap().push(line.to_string()));
        let runtime = MonitorRuntime::new(Arc::new(NoHost)).scheduler(scheduler.clone());
        let monitor = UtilizationMonitor::new(runtime, settings, sink.clone())
            .with_log(log)
            .with_latch(latch);
        Self {
            monitor,
            scheduler,
            sink,
            lines,
        }
    }

    fn checkpoint(&self, stage: &str, step: Option<&str>) -> Vec<Alarm> {
        self.monitor.record_stage_checkpoint(stage, step, None, Map::new())
    }

    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

fn overall(utilization: f64, pending: u64) -> serde_json::Value {
    json!({
        "utilization": { "overall": utilization },
        "activity": { "pending": pending, "running": 2 },
        "tokens": { "cpu": { "total": 4 }, "io": { "total": 4 } }
    })
}

fn queue_only(pending: u64, running: u64) -> serde_json::Value {
    json!({ "queues": { "io": { "pending": pending, "running": running } } })
}

// ── Low-utilization warning ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_low_utilization_warns_once() {
    let h = Harness::new(MonitorSettings::default());
    h.scheduler.set(overall(0.1, 200));

    for _ in 0..5 {
        h.checkpoint("discovery", None);
        tokio::time::advance(Duration::from_secs(1)).await;
    }

    let lines = h.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(
        lines[0],
        "[perf] scheduler under-utilization detected at discovery: utilization=0.10, pending=200, tokens(cpu=4, io=4)."
    );
    // one-shot warning writes no breach checkpoint
    assert_eq!(h.sink.records().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_shared_latch_spans_monitors() {
    let latch = LowUtilizationLatch::new();
    let first = Harness::with_latch(MonitorSettings::default(), latch.clone());
    let second = Harness::with_latch(MonitorSettings::default(), latch);
    first.scheduler.set(overall(0.1, 200));
    second.scheduler.set(overall(0.1, 200));

    first.checkpoint("discovery", None);
    second.checkpoint("discovery", None);

    assert_eq!(first.lines().len(), 1);
    assert!(second.lines().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shallow_backlog_does_not_warn() {
    let h = Harness::new(MonitorSettings::default());
    h.scheduler.set(overall(0.1, 40));
    h.checkpoint("discovery", None);
    assert!(h.lines().is_empty());
}

// ── Sustained alarm ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_sustained_alarm_fires_after_window() {
    let h = Harness::new(MonitorSettings::default());
    h.scheduler.set(overall(0.5, 40));

    assert!(h.checkpoint("postings", None).is_empty());
    tokio::time::advance(Duration::from_millis(14_999)).await;
    assert!(h.checkpoint("postings", None).is_empty());

    tokio::time::advance(Duration::from_millis(1)).await;
    let alarms = h.checkpoint("postings", None);
    assert_eq!(alarms.len(), 1);
    assert_eq!(
        h.lines(),
        vec!["[perf] sustained scheduler utilization below target at postings: utilization=0.50, target=0.75, pending=40, duration=15s."]
    );

    let breaches = h.sink.with_step(UTILIZATION_BREACH_STEP);
    assert_eq!(breaches.len(), 1);
    assert_eq!(breaches[0].stage, "scheduler");
    assert_eq!(breaches[0].label.as_deref(), Some("postings"));
    assert_eq!(breaches[0].extra["pending"], 40);
    assert_eq!(breaches[0].extra["durationMs"], 15_000);

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(h.checkpoint("postings", None).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sustained_alarm_resets_when_utilization_recovers() {
    let h = Harness::new(MonitorSettings::default());
    h.scheduler.set(overall(0.5, 40));
    h.checkpoint("write", None);

    tokio::time::advance(Duration::from_secs(10)).await;
    h.scheduler.set(overall(0.9, 40));
    h.checkpoint("write", None);

    h.scheduler.set(overall(0.5, 40));
    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(h.checkpoint("write", None).is_empty());
    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(h.checkpoint("write", None).is_empty());

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(h.checkpoint("write", None).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sustained_alarm_ignores_light_stages() {
    let h = Harness::new(MonitorSettings::default());
    h.scheduler.set(overall(0.5, 40));
    for _ in 0..4 {
        h.checkpoint("discovery", Some("scan"));
        tokio::time::advance(Duration::from_secs(10)).await;
    }
    assert!(h.lines().is_empty());

    // the step name decides
    h.checkpoint("stage3", Some("Relations"));
    tokio::time::advance(Duration::from_secs(15)).await;
    assert_eq!(h.checkpoint("stage3", Some("Relations")).len(), 1);
    assert!(h.lines()[0].contains("at stage3/Relations:"));
}

#[tokio::test(start_paused = true)]
async fn test_configured_target_and_window() {
    let settings = MonitorSettings::from_config(&flowgate_core::SchedulerAlertConfig {
        utilization_alert_target: Some(0.4),
        utilization_alert_window_ms: Some(2_000),
        ..Default::default()
    });
    let h = Harness::new(settings);
    h.scheduler.set(overall(0.5, 40));
    h.checkpoint("write", None);
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(h.checkpoint("write", None).is_empty());

    h.scheduler.set(overall(0.3, 40));
    h.checkpoint("write", None);
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(h.checkpoint("write", None).len(), 1);
}

// ── Per-queue alarm ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_queue_alarm_fires_once_per_stage_and_rearms() {
    let h = Harness::new(MonitorSettings::default());
    h.scheduler.set(queue_only(9, 1));

    h.checkpoint("write", None);
    tokio::time::advance(Duration::from_secs(15)).await;
    assert_eq!(h.checkpoint("write", None).len(), 1);
    tokio::time::advance(Duration::from_secs(15)).await;
    assert!(h.checkpoint("write", None).is_empty());

    let breaches = h.sink.with_step(QUEUE_UTILIZATION_BREACH_STEP);
    assert_eq!(breaches.len(), 1);
    assert_eq!(breaches[0].label.as_deref(), Some("write:io"));
    assert_eq!(breaches[0].extra["queue"], "io");
    assert_eq!(breaches[0].extra["running"], 1);

    // demand drops below 4: state clears
    h.scheduler.set(queue_only(1, 1));
    h.checkpoint("write", None);

    h.scheduler.set(queue_only(9, 1));
    h.checkpoint("write", None);
    tokio::time::advance(Duration::from_secs(14)).await;
    assert!(h.checkpoint("write", None).is_empty());
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(h.checkpoint("write", None).len(), 1);

    let line = h.lines().pop().unwrap();
    assert_eq!(
        line,
        "[perf] sustained queue utilization below target at write: queue=io, utilization=0.10, target=0.75, pending=9, running=1, durationMs=15000."
    );
}

#[tokio::test(start_paused = true)]
async fn test_queue_alarm_runs_for_every_stage() {
    let h = Harness::new(MonitorSettings::default());
    h.scheduler.set(queue_only(9, 1));
    h.checkpoint("discovery", None);
    tokio::time::advance(Duration::from_secs(15)).await;
    assert_eq!(h.checkpoint("discovery", None).len(), 1);
}

// ── Snapshots ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_checkpoint_embeds_scheduler_snapshot() {
    let h = Harness::new(MonitorSettings::default());
    h.scheduler.set(json!({
        "utilization": { "overall": 0.9 },
        "activity": { "pending": 3 },
        "queues": { "io": { "pending": 2 }, "cpu": { "pending": 5, "running": 1 } }
    }));
    h.monitor.record_stage_checkpoint("write", Some("flush"), Some("batch-1"), Map::new());

    let record = &h.sink.records()[0];
    assert_eq!(record.location(), "write/flush");
    let runtime = &record.extra["runtime"];
    assert_eq!(runtime["scheduler"]["utilization"]["overall"], 0.9);
    assert!(runtime["queues"].is_null());
}

#[tokio::test(start_paused = true)]
async fn test_queue_depth_snapshot_enablement() {
    let settings = MonitorSettings::from_config(&flowgate_core::SchedulerAlertConfig {
        queue_depth_snapshot_file_threshold: Some(100),
        queue_depth_snapshot_interval_ms: Some(2_500),
        ..Default::default()
    });
    let h = Harness::new(settings);
    assert!(!h.monitor.queue_depth_snapshots_enabled());
    assert!(!h.monitor.maybe_enable_queue_depth_snapshots_for_file_count(99));
    assert!(h.monitor.maybe_enable_queue_depth_snapshots_for_file_count(100));

    let options = h.scheduler.options.lock().unwrap().clone();
    assert_eq!(
        options,
        vec![TelemetryOptions {
            stage: None,
            queue_depth_snapshots_enabled: Some(true),
            queue_depth_snapshot_interval_ms: Some(2_500),
        }]
    );
}
