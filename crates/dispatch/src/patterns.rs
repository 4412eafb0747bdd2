//! Label patterns that force an artifact into a size tier.

use std::fmt;

use regex::Regex;
use serde::{Serialize, Serializer};
use tracing::warn;

use flowgate_core::FlowgateError;

/// Posting and chunk-metadata families are heavy regardless of size.
pub const DEFAULT_HEAVY_PATTERNS: &[&str] = &[
    r"(^|/)field_postings(?:\.|$)",
    r"(^|/)token_postings(?:\.|$)",
    r"(^|/)chunk_meta(?:\.|$)",
];

/// Manifests and small JSON sidecars.
pub const DEFAULT_ULTRA_LIGHT_PATTERNS: &[&str] = &[
    r"(^|/)\.filelists\.json$",
    r"(^|/).*\.meta\.json$",
    r"(^|/)determinism_report\.json$",
    r"(^|/)vocab_order\.json$",
    r"(^|/)pieces/manifest\.json$",
];

/// Packed and binary-columnar posting files.
pub const DEFAULT_MASSIVE_PATTERNS: &[&str] = &[
    r"(^|/)field_postings(?:\.|$)",
    r"(^|/)field_postings\.binary-columnar(?:\.|$)",
    r"(^|/)token_postings\.packed(?:\.|$)",
    r"(^|/)token_postings\.binary-columnar(?:\.|$)",
    r"(^|/)chunk_meta\.binary-columnar(?:\.|$)",
];

/// How invalid pattern strings are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternMode {
    /// Log and skip the entry.
    Lenient,
    /// Fail resolution with [`FlowgateError::Pattern`].
    Strict,
}

/// Compiled label matchers. Serializes as the list of source patterns.
#[derive(Clone, Default)]
pub struct WritePatterns(Vec<Regex>);

impl WritePatterns {
    /// Compile configured patterns, or the built-in `defaults` when `configured`
    /// is absent or empty. A non-empty configured list replaces the defaults,
    /// even if none of its entries survive compilation.
    pub fn resolve(
        configured: Option<&[String]>,
        defaults: &[&str],
        mode: PatternMode,
    ) -> Result<Self, FlowgateError> {
        match (configured.filter(|list| !list.is_empty()), mode) {
            (Some(list), PatternMode::Strict) => Self::compile_strict(list.iter().map(String::as_str)),
            _ => Ok(Self::resolve_lenient(configured, defaults)),
        }
    }

    /// Like [`resolve`](Self::resolve) in lenient mode, which cannot fail.
    pub fn resolve_lenient(configured: Option<&[String]>, defaults: &[&str]) -> Self {
        match configured.filter(|list| !list.is_empty()) {
            Some(list) => Self::compile_lenient(list.iter().map(String::as_str)),
            None => Self::compile_lenient(defaults.iter().copied()),
        }
    }

    /// Compile patterns, skipping blank and invalid entries.
    pub fn compile_lenient<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        Self(
            patterns
                .into_iter()
                .filter(|p| !p.trim().is_empty())
                .filter_map(|pattern| match Regex::new(pattern) {
                    Ok(regex) => Some(regex),
                    Err(error) => {
                        warn!(pattern, %error, "skipping invalid write label pattern");
                        None
                    }
                })
                .collect(),
        )
    }

    /// Compile patterns, skipping blank entries and failing on the first invalid one.
    pub fn compile_strict<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<Self, FlowgateError> {
        patterns
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| FlowgateError::Pattern {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn matches(&self, label: &str) -> bool {
        self.0.iter().any(|regex| regex.is_match(label))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(Regex::as_str)
    }
}

impl fmt::Debug for WritePatterns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.sources()).finish()
    }
}

impl PartialEq for WritePatterns {
    fn eq(&self, other: &Self) -> bool {
        self.sources().eq(other.sources())
    }
}

impl Serialize for WritePatterns {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.sources())
    }
}
