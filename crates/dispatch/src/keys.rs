//! Artifact config keys and the lookup helpers that read them.
//!
//! Work-class overrides accept several legacy names. Each class has an ordered
//! candidate list; the first positive value wins. New aliases are added to the
//! lists, never as extra branches in the resolver.

use flowgate_core::coerce::{floor_at_least, positive_int};
use flowgate_core::ArtifactConfig;

// ── Size tiers ──────────────────────────────────────────────────────

pub const HEAVY_THRESHOLD_BYTES: &str = "writeHeavyThresholdBytes";
pub const HEAVY_LABEL_PATTERNS: &str = "writeHeavyLabelPatterns";
pub const HEAVY_CONCURRENCY: &str = "writeHeavyConcurrency";
pub const ULTRA_LIGHT_THRESHOLD_BYTES: &str = "writeUltraLightThresholdBytes";
pub const ULTRA_LIGHT_LABEL_PATTERNS: &str = "writeUltraLightLabelPatterns";
pub const MASSIVE_THRESHOLD_BYTES: &str = "writeMassiveThresholdBytes";
pub const MASSIVE_LABEL_PATTERNS: &str = "writeMassiveLabelPatterns";
pub const MASSIVE_IO_TOKENS: &str = "writeMassiveIoTokens";
pub const MASSIVE_MEM_TOKENS: &str = "writeMassiveMemTokens";

// ── Work-class overrides ────────────────────────────────────────────

pub const SMALL_CONCURRENCY_KEYS: &[&str] = &["writeSmallConcurrency", "writeWorkClassSmallConcurrency"];

pub const MEDIUM_CONCURRENCY_KEYS: &[&str] = &[
    "writeMediumConcurrency",
    "writeWorkClassMediumConcurrency",
    HEAVY_CONCURRENCY,
];

pub const LARGE_CONCURRENCY_KEYS: &[&str] = &[
    "writeLargeConcurrency",
    "writeWorkClassLargeConcurrency",
    "writeMassiveConcurrency",
];

// ── Adaptive concurrency ────────────────────────────────────────────

pub const ADAPTIVE_ENABLED: &str = "writeAdaptiveConcurrency";
pub const ADAPTIVE_MIN: &str = "writeAdaptiveMinConcurrency";
pub const ADAPTIVE_START: &str = "writeAdaptiveStartConcurrency";
pub const ADAPTIVE_SCALE_UP_BACKLOG: &str = "writeAdaptiveScaleUpBacklogPerSlot";
pub const ADAPTIVE_SCALE_DOWN_BACKLOG: &str = "writeAdaptiveScaleDownBacklogPerSlot";
pub const ADAPTIVE_STALL_SCALE_DOWN: &str = "writeAdaptiveStallScaleDownSeconds";
pub const ADAPTIVE_STALL_SCALE_UP_GUARD: &str = "writeAdaptiveStallScaleUpGuardSeconds";
pub const ADAPTIVE_SCALE_UP_COOLDOWN: &str = "writeAdaptiveScaleUpCooldownMs";
pub const ADAPTIVE_SCALE_DOWN_COOLDOWN: &str = "writeAdaptiveScaleDownCooldownMs";

// ── Tail rescue / tail worker ───────────────────────────────────────

pub const TAIL_RESCUE_ENABLED: &str = "writeTailRescue";
pub const TAIL_RESCUE_MAX_PENDING: &str = "writeTailRescueMaxPending";
pub const TAIL_RESCUE_STALL_SECONDS: &str = "writeTailRescueStallSeconds";
pub const TAIL_RESCUE_BOOST_IO: &str = "writeTailRescueBoostIoTokens";
pub const TAIL_RESCUE_BOOST_MEM: &str = "writeTailRescueBoostMemTokens";
pub const TAIL_WORKER: &str = "writeTailWorker";
pub const TAIL_WORKER_MAX_PENDING: &str = "writeTailWorkerMaxPending";

// ── Stall alerts ────────────────────────────────────────────────────

pub const STALL_THRESHOLDS_SECONDS: &str = "writeStallThresholdsSeconds";
pub const STALL_WARN_SECONDS: &str = "writeStallWarnSeconds";
pub const STALL_CRITICAL_SECONDS: &str = "writeStallCriticalSeconds";

// ── Lookups ─────────────────────────────────────────────────────────

/// Integer at `key`, floored and clamped to at least `floor`.
pub fn int_at_least(config: &ArtifactConfig, key: &str, floor: u64) -> Option<u64> {
    config.number(key).map(|v| floor_at_least(v, floor))
}

/// Fractional value at `key`, clamped to at least `floor`.
pub fn number_at_least(config: &ArtifactConfig, key: &str, floor: f64) -> Option<f64> {
    config.number(key).map(|v| v.max(floor))
}

/// First strictly positive value among `keys`, floored to an integer `>= 1`.
pub fn first_positive(config: &ArtifactConfig, keys: &[&str]) -> Option<u64> {
    keys.iter()
        .filter_map(|key| config.number(key))
        .find(|v| *v > 0.0)
        .map(|v| positive_int(Some(v)).unwrap_or(1))
}
