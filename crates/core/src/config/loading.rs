use std::env;
use std::path::Path;

use crate::error::FlowgateError;

use super::types::FlowgateConfig;

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.trim().parse().ok())
}

/// Load `.env` (silently ignores a missing file).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

impl FlowgateConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, FlowgateError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowgateError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides, for callers without a config file.
    pub fn from_env() -> Result<Self, FlowgateError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `FLOWGATE_SECTION_KEY` overrides `section.key`.
    /// - `FLOWGATE_QUEUE_MAX_PENDING` -> `queue.max_pending`
    /// - `FLOWGATE_QUEUE_MAX_PENDING_ROWS` -> `queue.max_pending_rows`
    /// - `FLOWGATE_QUEUE_MAX_PENDING_BYTES` -> `queue.max_pending_bytes`
    /// - `FLOWGATE_QUEUE_MAX_HEAP_FRACTION` -> `queue.max_heap_fraction`
    /// - `FLOWGATE_SCHEDULER_UTILIZATION_ALERT_TARGET` -> `scheduler.utilization_alert_target`
    /// - `FLOWGATE_SCHEDULER_UTILIZATION_ALERT_WINDOW_MS` -> `scheduler.utilization_alert_window_ms`
    /// - `FLOWGATE_WRITE_FS_TAIL_WORKER` -> `write_fs.tail_worker`
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parsed("FLOWGATE_QUEUE_MAX_PENDING") {
            self.queue.max_pending = Some(v);
        }
        if let Some(v) = env_parsed("FLOWGATE_QUEUE_MAX_PENDING_ROWS") {
            self.queue.max_pending_rows = Some(v);
        }
        if let Some(v) = env_parsed("FLOWGATE_QUEUE_MAX_PENDING_BYTES") {
            self.queue.max_pending_bytes = Some(v);
        }
        if let Some(v) = env_parsed("FLOWGATE_QUEUE_MAX_HEAP_FRACTION") {
            self.queue.max_heap_fraction = Some(v);
        }
        if let Some(v) = env_parsed("FLOWGATE_SCHEDULER_UTILIZATION_ALERT_TARGET") {
            self.scheduler.utilization_alert_target = Some(v);
        }
        if let Some(v) = env_parsed("FLOWGATE_SCHEDULER_UTILIZATION_ALERT_WINDOW_MS") {
            self.scheduler.utilization_alert_window_ms = Some(v);
        }
        if let Some(v) = env_parsed("FLOWGATE_WRITE_FS_TAIL_WORKER") {
            self.write_fs.tail_worker = v;
        }
    }

    /// Log a one-line-per-section summary at startup.
    pub fn log_summary(&self) {
        tracing::info!(
            max_pending = ?self.queue.max_pending,
            max_pending_rows = ?self.queue.max_pending_rows,
            max_pending_bytes = ?self.queue.max_pending_bytes,
            max_heap_fraction = ?self.queue.max_heap_fraction,
            "queue limits"
        );
        tracing::info!(
            target = ?self.scheduler.utilization_alert_target,
            window_ms = ?self.scheduler.utilization_alert_window_ms,
            huge_repo_profile = self.scheduler.huge_repo_profile,
            "scheduler alerts"
        );
        tracing::info!(
            tail_worker = self.write_fs.tail_worker,
            artifact_keys = !self.artifacts.is_empty(),
            "write strategy"
        );
    }
}
