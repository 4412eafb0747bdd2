use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coerce::finite_number;

/// Loosely-typed artifact-write tunables.
///
/// Keys keep the camelCase names used by the artifact writer
/// (`writeHeavyThresholdBytes`, `writeAdaptiveConcurrency`, ...). Values are
/// kept as raw JSON so malformed entries degrade to defaults at resolution
/// time instead of failing the whole config parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactConfig(Map<String, Value>);

impl ArtifactConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and programmatic callers.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The value at `key` read as a finite number.
    pub fn number(&self, key: &str) -> Option<f64> {
        finite_number(self.get(key))
    }

    /// `false` only when the key is literally `false`; absent or anything else
    /// reads as enabled.
    pub fn enabled_unless_false(&self, key: &str) -> bool {
        !matches!(self.get(key), Some(Value::Bool(false)))
    }

    /// The value at `key` as a list of strings, or `None` when it is not an array.
    ///
    /// Non-string array entries are dropped.
    pub fn string_list(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for ArtifactConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
