//! Stage checkpoints with utilization alarms.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;

use flowgate_core::{emit_line, LogSink};

use crate::alarms::{is_heavy_stage, Alarm, LowUtilizationLatch, QueueAlarms, SustainedAlarm};
use crate::checkpoint::{location, CheckpointRecord, CheckpointSink};
use crate::runtime::MonitorRuntime;
use crate::snapshot::RuntimeSnapshot;
use crate::types::{MonitorSettings, SchedulerStats, TelemetryOptions};

#[derive(Debug, Default)]
struct AlarmState {
    sustained: SustainedAlarm,
    queues: QueueAlarms,
}

/// Records stage checkpoints and raises advisory utilization alarms.
///
/// Alarms never feed back into admission; they only log and write
/// checkpoints.
pub struct UtilizationMonitor {
    runtime: MonitorRuntime,
    settings: MonitorSettings,
    sink: Arc<dyn CheckpointSink>,
    log: Option<LogSink>,
    latch: LowUtilizationLatch,
    alarms: Mutex<AlarmState>,
    stage: AtomicU64,
    snapshots_enabled: AtomicBool,
}

impl fmt::Debug for UtilizationMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UtilizationMonitor")
            .field("runtime", &self.runtime)
            .field("settings", &self.settings)
            .field("stage", &self.stage_number())
            .field("queue_depth_snapshots", &self.queue_depth_snapshots_enabled())
            .finish_non_exhaustive()
    }
}

impl UtilizationMonitor {
    /// Build a monitor. With the huge-repo profile on, queue-depth snapshots
    /// are enabled immediately.
    pub fn new(runtime: MonitorRuntime, settings: MonitorSettings, sink: Arc<dyn CheckpointSink>) -> Self {
        let monitor = Self {
            runtime,
            settings,
            sink,
            log: None,
            latch: LowUtilizationLatch::process(),
            alarms: Mutex::new(AlarmState::default()),
            stage: AtomicU64::new(0),
            snapshots_enabled: AtomicBool::new(false),
        };
        if monitor.settings.huge_repo_profile {
            monitor.enable_queue_depth_snapshots();
        }
        monitor
    }

    pub fn with_log(mut self, log: LogSink) -> Self {
        self.log = Some(log);
        self
    }

    /// Use `latch` for the one-shot low-utilization warning instead of the
    /// process-wide latch.
    pub fn with_latch(mut self, latch: LowUtilizationLatch) -> Self {
        self.latch = latch;
        self
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn runtime(&self) -> &MonitorRuntime {
        &self.runtime
    }

    pub fn scheduler_stats(&self) -> Option<SchedulerStats> {
        self.runtime.scheduler_stats()
    }

    /// Number of stages entered through [`advance_stage`](Self::advance_stage).
    pub fn stage_number(&self) -> u64 {
        self.stage.load(Ordering::Relaxed)
    }

    /// Enter a new stage and retag scheduler telemetry with its id.
    pub fn advance_stage(&self, stage_id: &str) -> u64 {
        let number = self.stage.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(stage = stage_id, number, "stage started");
        if let Some(scheduler) = &self.runtime.scheduler {
            scheduler.set_telemetry_options(TelemetryOptions {
                stage: Some(stage_id.to_string()),
                ..TelemetryOptions::default()
            });
        }
        number
    }

    pub fn queue_depth_snapshots_enabled(&self) -> bool {
        self.snapshots_enabled.load(Ordering::Acquire)
    }

    /// Turn on queue-depth snapshots once `file_count` reaches the configured
    /// threshold. Returns whether snapshots are enabled afterwards.
    pub fn maybe_enable_queue_depth_snapshots_for_file_count(&self, file_count: u64) -> bool {
        if self.queue_depth_snapshots_enabled() {
            return true;
        }
        if file_count < self.settings.queue_depth_snapshot_file_threshold {
            return false;
        }
        tracing::info!(
            file_count,
            threshold = self.settings.queue_depth_snapshot_file_threshold,
            "enabling scheduler queue-depth snapshots"
        );
        self.enable_queue_depth_snapshots();
        true
    }

    fn enable_queue_depth_snapshots(&self) {
        if self.snapshots_enabled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(scheduler) = &self.runtime.scheduler {
            scheduler.set_telemetry_options(TelemetryOptions {
                stage: None,
                queue_depth_snapshots_enabled: Some(true),
                queue_depth_snapshot_interval_ms: Some(self.settings.queue_depth_snapshot_interval_ms),
            });
        }
    }

    /// Record a checkpoint enriched with a runtime snapshot, then evaluate
    /// the utilization alarms against that snapshot.
    pub fn record_stage_checkpoint(
        &self,
        stage: &str,
        step: Option<&str>,
        label: Option<&str>,
        extra: Map<String, Value>,
    ) -> Vec<Alarm> {
        self.record_stage_checkpoint_at(stage, step, label, extra, Instant::now())
    }

    pub fn record_stage_checkpoint_at(
        &self,
        stage: &str,
        step: Option<&str>,
        label: Option<&str>,
        mut extra: Map<String, Value>,
        now: Instant,
    ) -> Vec<Alarm> {
        let snapshot = RuntimeSnapshot::capture(&self.runtime);
        let scheduler = snapshot.scheduler.clone();
        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                extra.insert("runtime".to_string(), value);
            }
            Err(err) => tracing::warn!(error = %err, "runtime snapshot not serializable"),
        }

        let mut record = CheckpointRecord::new(stage).extra(extra);
        if let Some(step) = step.filter(|s| !s.is_empty()) {
            record = record.step(step);
        }
        if let Some(label) = label {
            record = record.label(label);
        }
        self.sink.record(record);

        let alarms = self.evaluate(stage, step, scheduler.as_ref(), now);
        let at = location(stage, step);
        for alarm in &alarms {
            tracing::info!(alarm = alarm.kind(), location = %at, "scheduler utilization alarm");
            emit_line(self.log.as_ref(), &alarm.log_line(&at));
            if let Some(record) = alarm.checkpoint(&at) {
                self.sink.record(record);
            }
        }
        alarms
    }

    fn evaluate(&self, stage: &str, step: Option<&str>, stats: Option<&SchedulerStats>, now: Instant) -> Vec<Alarm> {
        let sample = stats.and_then(SchedulerStats::utilization_sample);
        let target = self.settings.utilization_target;
        let window = Duration::from_millis(self.settings.alert_window_ms);
        let mut alarms = Vec::new();

        if let Some(alarm) = sample.as_ref().and_then(|s| self.latch.check(s)) {
            alarms.push(alarm);
        }

        let mut state = self.alarms.lock().unwrap_or_else(PoisonError::into_inner);
        let heavy = is_heavy_stage(stage, step);
        if let Some(alarm) = state.sustained.observe(heavy, sample.as_ref(), target, window, now) {
            alarms.push(alarm);
        }
        if let Some(stats) = stats {
            alarms.extend(state.queues.observe(stage, &stats.queues, target, window, now));
        }
        alarms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointSink;
    use crate::runtime::{HostSample, HostSampler, SchedulerStatsSource};

    struct NoHost;

    impl HostSampler for NoHost {
        fn sample(&self) -> HostSample {
            HostSample::default()
        }
    }

    #[derive(Default)]
    struct RecordingScheduler {
        options: Mutex<Vec<TelemetryOptions>>,
    }

    impl SchedulerStatsSource for RecordingScheduler {
        fn stats(&self) -> Option<SchedulerStats> {
            None
        }

        fn set_telemetry_options(&self, options: TelemetryOptions) {
            self.options.lock().unwrap().push(options);
        }
    }

    fn monitor(settings: MonitorSettings) -> (UtilizationMonitor, Arc<RecordingScheduler>, Arc<MemoryCheckpointSink>) {
        let scheduler = Arc::new(RecordingScheduler::default());
        let sink = Arc::new(MemoryCheckpointSink::new());
        let runtime = MonitorRuntime::new(Arc::new(NoHost)).scheduler(scheduler.clone());
        let monitor = UtilizationMonitor::new(runtime, settings, sink.clone()).with_latch(LowUtilizationLatch::new());
        (monitor, scheduler, sink)
    }

    #[test]
    fn advance_stage_counts_and_retags() {
        let (monitor, scheduler, _) = monitor(MonitorSettings::default());
        assert_eq!(monitor.advance_stage("discovery"), 1);
        assert_eq!(monitor.advance_stage("postings"), 2);
        assert_eq!(monitor.stage_number(), 2);
        let options = scheduler.options.lock().unwrap();
        assert_eq!(options[1].stage.as_deref(), Some("postings"));
        assert_eq!(options[1].queue_depth_snapshots_enabled, None);
    }

    #[test]
    fn huge_repo_profile_enables_snapshots_up_front() {
        let settings = MonitorSettings {
            huge_repo_profile: true,
            ..MonitorSettings::default()
        };
        let (monitor, scheduler, _) = monitor(settings);
        assert!(monitor.queue_depth_snapshots_enabled());
        let options = scheduler.options.lock().unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].queue_depth_snapshot_interval_ms, Some(5_000));
    }

    #[test]
    fn file_count_threshold_enables_snapshots_once() {
        let (monitor, scheduler, _) = monitor(MonitorSettings::default());
        assert!(!monitor.maybe_enable_queue_depth_snapshots_for_file_count(19_999));
        assert!(monitor.maybe_enable_queue_depth_snapshots_for_file_count(20_000));
        assert!(monitor.maybe_enable_queue_depth_snapshots_for_file_count(5));
        assert_eq!(scheduler.options.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn checkpoint_carries_runtime_snapshot() {
        let (monitor, _, sink) = monitor(MonitorSettings::default());
        let mut extra = Map::new();
        extra.insert("files".to_string(), Value::from(12));
        let alarms = monitor.record_stage_checkpoint("discovery", Some(""), Some("scan"), extra);
        assert!(alarms.is_empty());

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].step, None);
        assert_eq!(records[0].label.as_deref(), Some("scan"));
        assert_eq!(records[0].extra["files"], 12);
        assert!(records[0].extra["runtime"]["cpu"].is_object());
    }
}
