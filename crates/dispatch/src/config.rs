//! Resolution of raw artifact tunables into a fully defaulted dispatch config.
//!
//! Every field is layered: explicit value, then (for work-class overrides) the
//! alias list in [`crate::keys`], then the hard default. Malformed values read
//! as unset and never fail resolution; only [`WriteDispatchConfig::resolve_strict`]
//! rejects invalid label patterns.

use std::convert::Infallible;

use serde::{Deserialize, Serialize};
use tracing::debug;

use flowgate_core::{ArtifactConfig, FlowgateError, WriteFsConfig};

use crate::keys::{self, first_positive, int_at_least, number_at_least};
use crate::patterns::{
    PatternMode, WritePatterns, DEFAULT_HEAVY_PATTERNS, DEFAULT_MASSIVE_PATTERNS,
    DEFAULT_ULTRA_LIGHT_PATTERNS,
};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

pub const DEFAULT_HEAVY_THRESHOLD_BYTES: u64 = 16 * MIB;
pub const MIN_HEAVY_THRESHOLD_BYTES: u64 = MIB;
pub const DEFAULT_ULTRA_LIGHT_THRESHOLD_BYTES: u64 = 64 * KIB;
pub const MIN_ULTRA_LIGHT_THRESHOLD_BYTES: u64 = KIB;
pub const DEFAULT_MASSIVE_THRESHOLD_BYTES: u64 = 128 * MIB;
pub const MIN_MASSIVE_THRESHOLD_BYTES: u64 = 8 * MIB;

/// Stall alert levels used when none are configured.
pub const DEFAULT_STALL_THRESHOLDS_SECONDS: &[u64] = &[10, 30, 60];

/// Filesystem write strategy chosen outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteFsStrategy {
    /// Whether a tail-draining worker topology is in use.
    pub tail_worker: bool,
}

impl Default for WriteFsStrategy {
    fn default() -> Self {
        Self { tail_worker: true }
    }
}

impl WriteFsStrategy {
    /// Strategy derived from the artifact config: enabled unless
    /// `writeTailWorker` is literally `false`.
    pub fn from_artifact_config(config: &ArtifactConfig) -> Self {
        Self {
            tail_worker: config.enabled_unless_false(keys::TAIL_WORKER),
        }
    }
}

impl From<&WriteFsConfig> for WriteFsStrategy {
    fn from(config: &WriteFsConfig) -> Self {
        Self {
            tail_worker: config.tail_worker,
        }
    }
}

/// Adaptive write-concurrency parameters.
///
/// Serialized under the flat `adaptiveWrite*` names the write router reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveWriteConfig {
    #[serde(rename = "adaptiveWriteConcurrencyEnabled")]
    pub enabled: bool,
    #[serde(rename = "adaptiveWriteMinConcurrency")]
    pub min_concurrency: u64,
    #[serde(rename = "adaptiveWriteStartConcurrencyOverride")]
    pub start_concurrency_override: Option<u64>,
    #[serde(rename = "adaptiveWriteScaleUpBacklogPerSlot")]
    pub scale_up_backlog_per_slot: f64,
    #[serde(rename = "adaptiveWriteScaleDownBacklogPerSlot")]
    pub scale_down_backlog_per_slot: f64,
    #[serde(rename = "adaptiveWriteStallScaleDownSeconds")]
    pub stall_scale_down_seconds: u64,
    #[serde(rename = "adaptiveWriteStallScaleUpGuardSeconds")]
    pub stall_scale_up_guard_seconds: u64,
    #[serde(rename = "adaptiveWriteScaleUpCooldownMs")]
    pub scale_up_cooldown_ms: u64,
    #[serde(rename = "adaptiveWriteScaleDownCooldownMs")]
    pub scale_down_cooldown_ms: u64,
}

impl Default for AdaptiveWriteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_concurrency: 1,
            start_concurrency_override: None,
            scale_up_backlog_per_slot: 1.75,
            scale_down_backlog_per_slot: 0.5,
            stall_scale_down_seconds: 20,
            stall_scale_up_guard_seconds: 8,
            scale_up_cooldown_ms: 400,
            scale_down_cooldown_ms: 1200,
        }
    }
}

/// Tail-rescue parameters, serialized under the flat `writeTailRescue*` names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TailRescueConfig {
    #[serde(rename = "writeTailRescueEnabled")]
    pub enabled: bool,
    #[serde(rename = "writeTailRescueMaxPending")]
    pub max_pending: u64,
    #[serde(rename = "writeTailRescueStallSeconds")]
    pub stall_seconds: u64,
    #[serde(rename = "writeTailRescueBoostIoTokens")]
    pub boost_io_tokens: u64,
    #[serde(rename = "writeTailRescueBoostMemTokens")]
    pub boost_mem_tokens: u64,
}

impl Default for TailRescueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pending: 3,
            stall_seconds: 15,
            boost_io_tokens: 1,
            boost_mem_tokens: 1,
        }
    }
}

/// A stall-alert threshold and its telemetry level name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StallThreshold {
    pub seconds: u64,
    pub level: String,
}

impl StallThreshold {
    fn new(seconds: u64, index: usize) -> Self {
        let level = match seconds {
            s if s >= 60 => "severe".to_string(),
            s if s >= 30 => "critical".to_string(),
            s if s >= 10 => "warning".to_string(),
            _ => format!("level-{}", index + 1),
        };
        Self { seconds, level }
    }
}

/// Immutable dispatch configuration consumed by the write router.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteDispatchConfig {
    pub heavy_write_threshold_bytes: u64,
    pub forced_heavy_write_patterns: WritePatterns,
    pub heavy_write_concurrency_override: Option<u64>,
    pub ultra_light_write_threshold_bytes: u64,
    pub forced_ultra_light_write_patterns: WritePatterns,
    pub massive_write_threshold_bytes: u64,
    pub forced_massive_write_patterns: WritePatterns,
    pub massive_write_io_tokens: u64,
    pub massive_write_mem_tokens: u64,
    pub work_class_small_concurrency_override: Option<u64>,
    pub work_class_medium_concurrency_override: Option<u64>,
    pub work_class_large_concurrency_override: Option<u64>,
    #[serde(flatten)]
    pub adaptive: AdaptiveWriteConfig,
    #[serde(flatten)]
    pub tail_rescue: TailRescueConfig,
    pub write_tail_worker_enabled: bool,
    pub write_tail_worker_max_pending: u64,
    pub write_stall_thresholds: Vec<StallThreshold>,
}

impl WriteDispatchConfig {
    /// Resolve with lenient pattern handling: invalid patterns are logged and skipped.
    pub fn resolve(config: &ArtifactConfig, strategy: &WriteFsStrategy) -> Self {
        let lenient = |configured: Option<&[String]>, defaults: &[&str]| {
            Ok::<_, Infallible>(WritePatterns::resolve_lenient(configured, defaults))
        };
        match Self::resolve_with(config, strategy, lenient) {
            Ok(resolved) => resolved,
            Err(never) => match never {},
        }
    }

    /// Resolve, failing on the first invalid label pattern.
    pub fn resolve_strict(config: &ArtifactConfig, strategy: &WriteFsStrategy) -> Result<Self, FlowgateError> {
        Self::resolve_with(config, strategy, |configured, defaults| {
            WritePatterns::resolve(configured, defaults, PatternMode::Strict)
        })
    }

    fn resolve_with<E>(
        config: &ArtifactConfig,
        strategy: &WriteFsStrategy,
        compile: impl Fn(Option<&[String]>, &[&str]) -> Result<WritePatterns, E>,
    ) -> Result<Self, E> {
        let patterns = |key: &str, defaults: &[&str]| compile(config.string_list(key).as_deref(), defaults);

        let adaptive_defaults = AdaptiveWriteConfig::default();
        let adaptive = AdaptiveWriteConfig {
            enabled: config.enabled_unless_false(keys::ADAPTIVE_ENABLED),
            min_concurrency: int_at_least(config, keys::ADAPTIVE_MIN, 1)
                .unwrap_or(adaptive_defaults.min_concurrency),
            start_concurrency_override: int_at_least(config, keys::ADAPTIVE_START, 1),
            scale_up_backlog_per_slot: number_at_least(config, keys::ADAPTIVE_SCALE_UP_BACKLOG, 1.0)
                .unwrap_or(adaptive_defaults.scale_up_backlog_per_slot),
            scale_down_backlog_per_slot: number_at_least(config, keys::ADAPTIVE_SCALE_DOWN_BACKLOG, 0.0)
                .unwrap_or(adaptive_defaults.scale_down_backlog_per_slot),
            stall_scale_down_seconds: int_at_least(config, keys::ADAPTIVE_STALL_SCALE_DOWN, 1)
                .unwrap_or(adaptive_defaults.stall_scale_down_seconds),
            stall_scale_up_guard_seconds: int_at_least(config, keys::ADAPTIVE_STALL_SCALE_UP_GUARD, 1)
                .unwrap_or(adaptive_defaults.stall_scale_up_guard_seconds),
            scale_up_cooldown_ms: int_at_least(config, keys::ADAPTIVE_SCALE_UP_COOLDOWN, 0)
                .unwrap_or(adaptive_defaults.scale_up_cooldown_ms),
            scale_down_cooldown_ms: int_at_least(config, keys::ADAPTIVE_SCALE_DOWN_COOLDOWN, 0)
                .unwrap_or(adaptive_defaults.scale_down_cooldown_ms),
        };

        let rescue_defaults = TailRescueConfig::default();
        let tail_rescue = TailRescueConfig {
            enabled: config.enabled_unless_false(keys::TAIL_RESCUE_ENABLED),
            max_pending: int_at_least(config, keys::TAIL_RESCUE_MAX_PENDING, 1)
                .unwrap_or(rescue_defaults.max_pending),
            stall_seconds: int_at_least(config, keys::TAIL_RESCUE_STALL_SECONDS, 1)
                .unwrap_or(rescue_defaults.stall_seconds),
            boost_io_tokens: int_at_least(config, keys::TAIL_RESCUE_BOOST_IO, 0)
                .unwrap_or(rescue_defaults.boost_io_tokens),
            boost_mem_tokens: int_at_least(config, keys::TAIL_RESCUE_BOOST_MEM, 0)
                .unwrap_or(rescue_defaults.boost_mem_tokens),
        };

        let resolved = Self {
            heavy_write_threshold_bytes: int_at_least(config, keys::HEAVY_THRESHOLD_BYTES, MIN_HEAVY_THRESHOLD_BYTES)
                .unwrap_or(DEFAULT_HEAVY_THRESHOLD_BYTES),
            forced_heavy_write_patterns: patterns(keys::HEAVY_LABEL_PATTERNS, DEFAULT_HEAVY_PATTERNS)?,
            heavy_write_concurrency_override: int_at_least(config, keys::HEAVY_CONCURRENCY, 1),
            ultra_light_write_threshold_bytes: int_at_least(
                config,
                keys::ULTRA_LIGHT_THRESHOLD_BYTES,
                MIN_ULTRA_LIGHT_THRESHOLD_BYTES,
            )
            .unwrap_or(DEFAULT_ULTRA_LIGHT_THRESHOLD_BYTES),
            forced_ultra_light_write_patterns: patterns(
                keys::ULTRA_LIGHT_LABEL_PATTERNS,
                DEFAULT_ULTRA_LIGHT_PATTERNS,
            )?,
            massive_write_threshold_bytes: int_at_least(
                config,
                keys::MASSIVE_THRESHOLD_BYTES,
                MIN_MASSIVE_THRESHOLD_BYTES,
            )
            .unwrap_or(DEFAULT_MASSIVE_THRESHOLD_BYTES),
            forced_massive_write_patterns: patterns(keys::MASSIVE_LABEL_PATTERNS, DEFAULT_MASSIVE_PATTERNS)?,
            massive_write_io_tokens: int_at_least(config, keys::MASSIVE_IO_TOKENS, 1).unwrap_or(2),
            massive_write_mem_tokens: int_at_least(config, keys::MASSIVE_MEM_TOKENS, 0).unwrap_or(2),
            work_class_small_concurrency_override: first_positive(config, keys::SMALL_CONCURRENCY_KEYS),
            work_class_medium_concurrency_override: first_positive(config, keys::MEDIUM_CONCURRENCY_KEYS),
            work_class_large_concurrency_override: first_positive(config, keys::LARGE_CONCURRENCY_KEYS),
            adaptive,
            write_tail_worker_enabled: strategy.tail_worker,
            write_tail_worker_max_pending: int_at_least(config, keys::TAIL_WORKER_MAX_PENDING, 1)
                .unwrap_or_else(|| (tail_rescue.max_pending + 1).max(2)),
            tail_rescue,
            write_stall_thresholds: stall_thresholds(config),
        };

        debug!(
            heavy = resolved.heavy_write_threshold_bytes,
            ultra_light = resolved.ultra_light_write_threshold_bytes,
            massive = resolved.massive_write_threshold_bytes,
            adaptive = resolved.adaptive.enabled,
            tail_worker = resolved.write_tail_worker_enabled,
            "resolved write dispatch config"
        );
        Ok(resolved)
    }

    /// Stall level reached at `stall_secs`, if any.
    pub fn stall_level(&self, stall_secs: f64) -> Option<&StallThreshold> {
        self.write_stall_thresholds
            .iter()
            .rev()
            .find(|t| stall_secs >= t.seconds as f64)
    }
}

/// Configured thresholds (positive, deduplicated, ascending), or the defaults
/// extended by the legacy warn/critical settings.
fn stall_thresholds(config: &ArtifactConfig) -> Vec<StallThreshold> {
    let configured: Vec<u64> = match config.get(keys::STALL_THRESHOLDS_SECONDS) {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|item| flowgate_core::coerce::finite_number(Some(item)))
            .filter(|v| *v > 0.0)
            .map(|v| v.floor() as u64)
            .collect(),
        _ => Vec::new(),
    };

    let mut seconds = if configured.is_empty() {
        let mut defaults = DEFAULT_STALL_THRESHOLDS_SECONDS.to_vec();
        defaults.extend(int_at_least(config, keys::STALL_WARN_SECONDS, 1));
        defaults.extend(int_at_least(config, keys::STALL_CRITICAL_SECONDS, 1));
        defaults
    } else {
        configured
    };
    seconds.sort_unstable();
    seconds.dedup();
    seconds
        .into_iter()
        .enumerate()
        .map(|(index, s)| StallThreshold::new(s, index))
        .collect()
}
