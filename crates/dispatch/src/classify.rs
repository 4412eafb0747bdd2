//! Write-lane classification and scheduler token costing.

use serde::{Deserialize, Serialize};

use crate::config::WriteDispatchConfig;

/// Writes at or above this size charge one memory token.
pub const LARGE_WRITE_BYTES: u64 = 256 * 1024 * 1024;
/// Writes at or above this size charge two memory tokens.
pub const HUGE_WRITE_BYTES: u64 = 768 * 1024 * 1024;

/// Dispatch lane an artifact write is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteLane {
    UltraLight,
    Light,
    Heavy,
    Massive,
}

/// Concurrency bucket a lane draws its slots from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkClass {
    Small,
    Medium,
    Large,
}

impl WriteLane {
    pub fn work_class(self) -> WorkClass {
        match self {
            Self::UltraLight | Self::Light => WorkClass::Small,
            Self::Heavy => WorkClass::Medium,
            Self::Massive => WorkClass::Large,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UltraLight => "ultra-light",
            Self::Light => "light",
            Self::Heavy => "heavy",
            Self::Massive => "massive",
        }
    }
}

/// A queued write as seen by the classifier.
pub trait WriteEntry {
    fn label(&self) -> &str;
    fn estimated_bytes(&self) -> Option<u64>;
}

/// Writes split by lane, each lane keeping the input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneSplit<T> {
    pub ultra_light: Vec<T>,
    pub light: Vec<T>,
    pub heavy: Vec<T>,
    pub massive: Vec<T>,
}

impl<T> Default for LaneSplit<T> {
    fn default() -> Self {
        Self {
            ultra_light: Vec::new(),
            light: Vec::new(),
            heavy: Vec::new(),
            massive: Vec::new(),
        }
    }
}

impl<T> LaneSplit<T> {
    pub fn lane_mut(&mut self, lane: WriteLane) -> &mut Vec<T> {
        match lane {
            WriteLane::UltraLight => &mut self.ultra_light,
            WriteLane::Light => &mut self.light,
            WriteLane::Heavy => &mut self.heavy,
            WriteLane::Massive => &mut self.massive,
        }
    }

    pub fn len(&self) -> usize {
        self.ultra_light.len() + self.light.len() + self.heavy.len() + self.massive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scheduler tokens charged for one write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteTokens {
    pub io: u64,
    pub mem: u64,
}

/// Memory tokens for a write of `estimated_bytes`: small and medium writes
/// are IO-bound and cost none.
pub fn mem_tokens_for(estimated_bytes: Option<u64>) -> u64 {
    match estimated_bytes {
        Some(b) if b >= HUGE_WRITE_BYTES => 2,
        Some(b) if b >= LARGE_WRITE_BYTES => 1,
        _ => 0,
    }
}

impl WriteDispatchConfig {
    /// Route a write. Precedence: massive, heavy, ultra-light, light.
    ///
    /// A zero or unknown size never qualifies as ultra-light by size.
    pub fn classify(&self, label: &str, estimated_bytes: Option<u64>) -> WriteLane {
        let at_least = |threshold: u64| estimated_bytes.is_some_and(|b| b >= threshold);
        if self.forced_massive_write_patterns.matches(label) || at_least(self.massive_write_threshold_bytes) {
            WriteLane::Massive
        } else if self.forced_heavy_write_patterns.matches(label) || at_least(self.heavy_write_threshold_bytes) {
            WriteLane::Heavy
        } else if self.forced_ultra_light_write_patterns.matches(label)
            || estimated_bytes.is_some_and(|b| b > 0 && b <= self.ultra_light_write_threshold_bytes)
        {
            WriteLane::UltraLight
        } else {
            WriteLane::Light
        }
    }

    /// Partition entries by lane. Relative order within each lane is preserved.
    pub fn split_lanes<T: WriteEntry>(&self, entries: impl IntoIterator<Item = T>) -> LaneSplit<T> {
        let mut split = LaneSplit::default();
        for entry in entries {
            let lane = self.classify(entry.label(), entry.estimated_bytes());
            split.lane_mut(lane).push(entry);
        }
        split
    }

    /// Tokens charged for a write on `lane`, plus the tail-rescue boost when set.
    pub fn write_tokens(&self, lane: WriteLane, estimated_bytes: Option<u64>, rescue_boost: bool) -> WriteTokens {
        let mem = mem_tokens_for(estimated_bytes);
        let mut tokens = match lane {
            WriteLane::Massive => WriteTokens {
                io: self.massive_write_io_tokens,
                mem: mem.max(self.massive_write_mem_tokens),
            },
            _ => WriteTokens { io: 1, mem },
        };
        if rescue_boost {
            tokens.io += self.tail_rescue.boost_io_tokens;
            tokens.mem += self.tail_rescue.boost_mem_tokens;
        }
        tokens
    }
}
