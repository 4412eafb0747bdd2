use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// A stage checkpoint as written to the checkpoint sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub stage: String,
    pub step: Option<String>,
    pub label: Option<String>,
    pub extra: Map<String, Value>,
    pub recorded_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            step: None,
            label: None,
            extra: Map::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    /// `stage` or `stage/step`, as used in diagnostic lines.
    pub fn location(&self) -> String {
        location(&self.stage, self.step.as_deref())
    }
}

pub(crate) fn location(stage: &str, step: Option<&str>) -> String {
    match step.filter(|s| !s.is_empty()) {
        Some(step) => format!("{stage}/{step}"),
        None => stage.to_string(),
    }
}

/// Destination for stage checkpoints.
pub trait CheckpointSink: Send + Sync {
    fn record(&self, record: CheckpointRecord);
}

/// Keeps every checkpoint in memory.
#[derive(Debug, Default)]
pub struct MemoryCheckpointSink {
    records: Mutex<Vec<CheckpointRecord>>,
}

impl MemoryCheckpointSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CheckpointRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Checkpoints recorded with `step`.
    pub fn with_step(&self, step: &str) -> Vec<CheckpointRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.step.as_deref() == Some(step))
            .cloned()
            .collect()
    }
}

impl CheckpointSink for MemoryCheckpointSink {
    fn record(&self, record: CheckpointRecord) {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_joins_step() {
        assert_eq!(CheckpointRecord::new("write").location(), "write");
        assert_eq!(CheckpointRecord::new("write").step("flush").location(), "write/flush");
        assert_eq!(CheckpointRecord::new("write").step("").location(), "write");
    }

    #[test]
    fn memory_sink_filters_by_step() {
        let sink = MemoryCheckpointSink::new();
        sink.record(CheckpointRecord::new("scheduler").step("utilization-target-breach"));
        sink.record(CheckpointRecord::new("postings"));
        assert_eq!(sink.records().len(), 2);
        assert_eq!(sink.with_step("utilization-target-breach").len(), 1);
    }
}
