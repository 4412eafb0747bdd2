use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use flowgate_core::coerce::{from_u64, min_integer, unit_fraction};
use flowgate_core::SchedulerAlertConfig;

/// Stages whose scheduler utilization is held to the alert target.
pub const HEAVY_UTILIZATION_STAGES: &[&str] = &["processing", "relations", "postings", "write"];

pub const DEFAULT_UTILIZATION_TARGET: f64 = 0.75;
pub const DEFAULT_ALERT_WINDOW_MS: u64 = 15_000;
pub const MIN_ALERT_WINDOW_MS: u64 = 1_000;
pub const DEFAULT_QUEUE_DEPTH_SNAPSHOT_INTERVAL_MS: u64 = 5_000;
pub const MIN_QUEUE_DEPTH_SNAPSHOT_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_QUEUE_DEPTH_SNAPSHOT_FILE_THRESHOLD: u64 = 20_000;

// ── Scheduler stats ─────────────────────────────────────────────────

/// Scheduler statistics as reported by the pipeline scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerStats {
    pub utilization: SchedulerUtilization,
    pub activity: SchedulerActivity,
    pub tokens: SchedulerTokens,
    /// Per-queue activity keyed by queue name.
    pub queues: BTreeMap<String, QueueActivity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerUtilization {
    /// Overall running/capacity ratio.
    pub overall: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerActivity {
    pub pending: Option<u64>,
    pub running: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerTokens {
    pub cpu: TokenPool,
    pub io: TokenPool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenPool {
    pub total: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueActivity {
    pub pending: u64,
    pub running: u64,
}

impl QueueActivity {
    pub fn demand(&self) -> u64 {
        self.pending.saturating_add(self.running)
    }
}

impl SchedulerStats {
    /// Sum of pending work across all scheduler queues.
    pub fn queue_depth(&self) -> u64 {
        self.queues.values().fold(0, |depth, q| depth.saturating_add(q.pending))
    }

    /// Overall utilization sample, when both utilization and backlog are reported.
    pub fn utilization_sample(&self) -> Option<UtilizationSample> {
        let utilization = self.utilization.overall.filter(|v| v.is_finite())?;
        let pending = self.activity.pending?;
        let cpu_tokens = self.tokens.cpu.total.filter(|v| v.is_finite()).unwrap_or(0.0);
        let io_tokens = self.tokens.io.total.filter(|v| v.is_finite()).unwrap_or(0.0);
        Some(UtilizationSample {
            utilization,
            pending,
            cpu_tokens,
            io_tokens,
            token_budget: ((cpu_tokens + io_tokens).floor() as u64).max(1),
        })
    }
}

/// One reading of overall scheduler utilization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtilizationSample {
    pub utilization: f64,
    pub pending: u64,
    pub cpu_tokens: f64,
    pub io_tokens: f64,
    /// `max(1, floor(cpu + io))`.
    pub token_budget: u64,
}

// ── Telemetry options ───────────────────────────────────────────────

/// Options forwarded to the scheduler's telemetry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth_snapshots_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth_snapshot_interval_ms: Option<u64>,
}

// ── Settings ────────────────────────────────────────────────────────

/// Resolved alarm and snapshot settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSettings {
    pub utilization_target: f64,
    pub alert_window_ms: u64,
    pub queue_depth_snapshot_interval_ms: u64,
    pub queue_depth_snapshot_file_threshold: u64,
    pub huge_repo_profile: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from_config(&SchedulerAlertConfig::default())
    }
}

impl MonitorSettings {
    pub fn from_config(config: &SchedulerAlertConfig) -> Self {
        Self {
            utilization_target: unit_fraction(config.utilization_alert_target)
                .unwrap_or(DEFAULT_UTILIZATION_TARGET),
            alert_window_ms: min_integer(
                from_u64(config.utilization_alert_window_ms),
                MIN_ALERT_WINDOW_MS,
                DEFAULT_ALERT_WINDOW_MS,
            ),
            queue_depth_snapshot_interval_ms: min_integer(
                from_u64(config.queue_depth_snapshot_interval_ms),
                MIN_QUEUE_DEPTH_SNAPSHOT_INTERVAL_MS,
                DEFAULT_QUEUE_DEPTH_SNAPSHOT_INTERVAL_MS,
            ),
            queue_depth_snapshot_file_threshold: min_integer(
                from_u64(config.queue_depth_snapshot_file_threshold),
                1,
                DEFAULT_QUEUE_DEPTH_SNAPSHOT_FILE_THRESHOLD,
            ),
            huge_repo_profile: config.huge_repo_profile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sample_requires_utilization_and_pending() {
        let stats: SchedulerStats = serde_json::from_value(json!({
            "utilization": { "overall": 0.2 },
            "tokens": { "cpu": { "total": 3.5 }, "io": { "total": 2 } }
        }))
        .unwrap();
        assert!(stats.utilization_sample().is_none());

        let stats: SchedulerStats = serde_json::from_value(json!({
            "utilization": { "overall": 0.2 },
            "activity": { "pending": 80 },
            "tokens": { "cpu": { "total": 3.5 }, "io": { "total": 2 } }
        }))
        .unwrap();
        let sample = stats.utilization_sample().unwrap();
        assert_eq!(sample.pending, 80);
        assert_eq!(sample.token_budget, 5);
    }

    #[test]
    fn token_budget_is_at_least_one() {
        let stats = SchedulerStats {
            utilization: SchedulerUtilization { overall: Some(0.5) },
            activity: SchedulerActivity {
                pending: Some(1),
                running: None,
            },
            ..SchedulerStats::default()
        };
        assert_eq!(stats.utilization_sample().unwrap().token_budget, 1);
    }

    #[test]
    fn queue_depth_sums_pending() {
        let stats: SchedulerStats = serde_json::from_value(json!({
            "queues": { "io": { "pending": 3, "running": 1 }, "cpu": { "pending": 4 } }
        }))
        .unwrap();
        assert_eq!(stats.queue_depth(), 7);
        assert_eq!(stats.queues["io"].demand(), 4);
    }

    #[test]
    fn queue_totals_saturate() {
        let full = QueueActivity {
            pending: u64::MAX,
            running: 1,
        };
        assert_eq!(full.demand(), u64::MAX);

        let mut stats = SchedulerStats::default();
        stats.queues.insert("io".to_string(), full);
        stats.queues.insert("cpu".to_string(), QueueActivity { pending: 5, running: 0 });
        assert_eq!(stats.queue_depth(), u64::MAX);
    }

    #[test]
    fn settings_defaults_and_floors() {
        let s = MonitorSettings::default();
        assert_eq!(s.utilization_target, 0.75);
        assert_eq!(s.alert_window_ms, 15_000);
        assert_eq!(s.queue_depth_snapshot_interval_ms, 5_000);
        assert_eq!(s.queue_depth_snapshot_file_threshold, 20_000);

        let s = MonitorSettings::from_config(&SchedulerAlertConfig {
            utilization_alert_target: Some(1.5),
            utilization_alert_window_ms: Some(10),
            queue_depth_snapshot_interval_ms: Some(200),
            queue_depth_snapshot_file_threshold: Some(0),
            huge_repo_profile: true,
        });
        assert_eq!(s.utilization_target, 0.75);
        assert_eq!(s.alert_window_ms, 1_000);
        assert_eq!(s.queue_depth_snapshot_interval_ms, 1_000);
        assert_eq!(s.queue_depth_snapshot_file_threshold, 1);
        assert!(s.huge_repo_profile);
    }
}
