//! Resolution, routing and concurrency control for artifact writes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowgate_core::{ArtifactConfig, FlowgateConfig, LogSink};
use flowgate_dispatch::*;
use serde_json::json;

const MIB: u64 = 1024 * 1024;

struct Write {
    label: &'static str,
    bytes: Option<u64>,
}

impl WriteEntry for Write {
    fn label(&self) -> &str {
        self.label
    }

    fn estimated_bytes(&self) -> Option<u64> {
        self.bytes
    }
}

fn no_tail_worker() -> WriteFsStrategy {
    WriteFsStrategy { tail_worker: false }
}

fn capture_sink() -> (LogSink, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&lines);
    let sink: LogSink = Arc::new(move |line: &str| captured.lock().unwrap().push(line.to_string()));
    (sink, lines)
}

// ── Resolution ──────────────────────────────────────────────────────

#[test]
fn test_empty_config_defaults() {
    let c = WriteDispatchConfig::resolve(&ArtifactConfig::new(), &no_tail_worker());
    assert_eq!(c.heavy_write_threshold_bytes, 16 * MIB);
    assert_eq!(c.ultra_light_write_threshold_bytes, 64 * 1024);
    assert_eq!(c.massive_write_threshold_bytes, 128 * MIB);
    assert!(c.adaptive.enabled);
    assert!(!c.write_tail_worker_enabled);
}

#[test]
fn test_resolves_from_toml_config() {
    let config: FlowgateConfig = toml::from_str(
        r#"
        [artifacts]
        writeHeavyThresholdBytes = 33554432
        writeMassiveLabelPatterns = ["^blobs/"]
        writeAdaptiveConcurrency = false

        [write_fs]
        tail_worker = false
        "#,
    )
    .unwrap();
    let strategy = WriteFsStrategy::from(&config.write_fs);
    let c = WriteDispatchConfig::resolve(&config.artifacts, &strategy);
    assert_eq!(c.heavy_write_threshold_bytes, 32 * MIB);
    assert!(!c.adaptive.enabled);
    assert!(!c.write_tail_worker_enabled);
    assert_eq!(c.forced_massive_write_patterns.sources().collect::<Vec<_>>(), vec!["^blobs/"]);
}

// ── Routing ─────────────────────────────────────────────────────────

#[test]
fn test_pattern_override_replaces_defaults() {
    let defaults = WriteDispatchConfig::resolve(&ArtifactConfig::new(), &no_tail_worker());
    assert_eq!(defaults.classify("token_postings.packed.bin", Some(10)), WriteLane::Massive);

    let config = ArtifactConfig::new().with(keys::MASSIVE_LABEL_PATTERNS, json!(["^vectors/"]));
    let c = WriteDispatchConfig::resolve(&config, &no_tail_worker());
    // the packed-postings default no longer forces massive; the heavy family still applies
    assert_eq!(c.classify("token_postings.packed.bin", Some(10)), WriteLane::Heavy);
    assert_eq!(c.classify("out/field_postings.json", Some(10)), WriteLane::Heavy);
    assert_eq!(c.classify("vectors/dense.bin", Some(10)), WriteLane::Massive);
}

#[test]
fn test_split_lanes_keeps_order() {
    let c = WriteDispatchConfig::resolve(&ArtifactConfig::new(), &no_tail_worker());
    let writes = vec![
        Write { label: "a.json", bytes: Some(2 * MIB) },
        Write { label: "chunk_meta.json", bytes: Some(100) },
        Write { label: "b.json", bytes: Some(3 * MIB) },
        Write { label: "x.meta.json", bytes: None },
        Write { label: "huge.bin", bytes: Some(300 * MIB) },
    ];
    let split = c.split_lanes(writes);
    let labels = |lane: &[Write]| lane.iter().map(|w| w.label).collect::<Vec<_>>();
    assert_eq!(labels(&split.light), vec!["a.json", "b.json"]);
    assert_eq!(labels(&split.heavy), vec!["chunk_meta.json"]);
    assert_eq!(labels(&split.ultra_light), vec!["x.meta.json"]);
    assert_eq!(labels(&split.massive), vec!["huge.bin"]);
    assert_eq!(split.len(), 5);
}

#[test]
fn test_budgets_use_configured_overrides() {
    let config = ArtifactConfig::new().with("writeMassiveConcurrency", 3);
    let c = WriteDispatchConfig::resolve(&config, &no_tail_worker());
    let counts = WorkClassCounts {
        small: 10,
        medium: 10,
        large: 10,
    };
    let budgets = c.work_class_budgets(8, counts, 8);
    assert_eq!(budgets.large_concurrency, 3);
    assert_eq!(budgets.total(), 8);
}

// ── Adaptive concurrency ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_controller_ramps_then_drains() {
    let c = WriteDispatchConfig::resolve(&ArtifactConfig::new(), &no_tail_worker());
    let (sink, lines) = capture_sink();
    let mut controller = c.concurrency_controller(4, false).unwrap().with_log(sink);
    assert_eq!(controller.current(), 3);

    let busy = WriteSignals {
        pending_writes: 20,
        active_writes: 3,
        ..WriteSignals::default()
    };
    assert_eq!(controller.observe(busy), 4);
    tokio::time::advance(Duration::from_secs(1)).await;
    // capped at max
    assert_eq!(controller.observe(busy), 4);

    let idle = WriteSignals::default();
    assert_eq!(controller.observe(idle), 3);
    tokio::time::advance(Duration::from_millis(1200)).await;
    assert_eq!(controller.observe(idle), 2);

    assert_eq!(
        lines.lock().unwrap().as_slice(),
        [
            "[perf] adaptive artifact write concurrency 3 -> 4 (backlog, pending=20)",
            "[perf] adaptive artifact write concurrency 4 -> 3 (drain, pending=0)",
            "[perf] adaptive artifact write concurrency 3 -> 2 (drain, pending=0)",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stall_guard_blocks_scale_up() {
    let c = WriteDispatchConfig::resolve(&ArtifactConfig::new(), &no_tail_worker());
    let mut controller = c.concurrency_controller(8, false).unwrap().with_log(Arc::new(|_: &str| {}));
    let stalled = WriteSignals {
        pending_writes: 40,
        active_writes: 2,
        longest_stall_sec: 12.0,
        ..WriteSignals::default()
    };
    assert_eq!(controller.observe(stalled), 5);
}

// ── Tail rescue ─────────────────────────────────────────────────────

#[test]
fn test_tail_rescue_boosts_tokens() {
    let config = ArtifactConfig::new()
        .with(keys::TAIL_RESCUE_STALL_SECONDS, 5)
        .with(keys::TAIL_RESCUE_BOOST_MEM, 0);
    let c = WriteDispatchConfig::resolve(&config, &no_tail_worker());
    let (sink, lines) = capture_sink();
    let mut tracker = TailRescueTracker::new(c.tail_rescue_policy(), Some(sink));

    let boost = tracker.observe(1, 6.0).unwrap();
    let tokens = boost.apply(c.write_tokens(WriteLane::Heavy, Some(MIB), false));
    assert_eq!(tokens, WriteTokens { io: 2, mem: 0 });
    assert_eq!(tokens, c.write_tokens(WriteLane::Heavy, Some(MIB), true));

    assert!(tracker.observe(1, 6.0).is_some());
    assert_eq!(lines.lock().unwrap().len(), 1);
}

#[test]
fn test_stall_levels() {
    let c = WriteDispatchConfig::resolve(&ArtifactConfig::new(), &no_tail_worker());
    assert_eq!(c.stall_level(35.0).map(|t| t.level.as_str()), Some("critical"));
    assert_eq!(c.stall_level(9.0), None);
}
