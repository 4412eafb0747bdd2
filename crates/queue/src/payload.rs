//! Payload size estimation for queue reservations.
//!
//! Producers hand over the per-file result object. When the upstream stage
//! already attached `postingsPayload: {rows, bytes}` metadata it is used as-is;
//! otherwise rows are the chunk count and bytes approximate the JSON encoding
//! of the parts that will be written.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowgate_core::coerce::{finite_number, non_negative_int, positive_int};

/// Estimated cost of one write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadEstimate {
    pub rows: u64,
    pub bytes: u64,
}

/// Estimate the payload of a file result.
pub fn estimate_payload(result: &Value) -> PayloadEstimate {
    if let Some(precomputed) = precomputed_payload(result.get("postingsPayload")) {
        return precomputed;
    }
    PayloadEstimate {
        rows: payload_rows(result),
        bytes: payload_bytes(result),
    }
}

/// Validated `{rows, bytes}` metadata: rows must be positive, bytes non-negative.
fn precomputed_payload(meta: Option<&Value>) -> Option<PayloadEstimate> {
    let meta = meta?.as_object()?;
    let rows = positive_int(finite_number(meta.get("rows")))?;
    let bytes = non_negative_int(finite_number(meta.get("bytes")))?;
    Some(PayloadEstimate { rows, bytes })
}

fn payload_rows(result: &Value) -> u64 {
    match result.get("chunks") {
        Some(Value::Array(chunks)) if !chunks.is_empty() => chunks.len() as u64,
        _ => 1,
    }
}

fn payload_bytes(result: &Value) -> u64 {
    if !result.is_object() {
        return 0;
    }
    let mut total = 0;
    if let Some(chunks @ Value::Array(_)) = result.get("chunks") {
        total += json_bytes(chunks);
    }
    for key in ["fileRelations", "vfsManifestRows"] {
        if let Some(value) = result.get(key).filter(|v| is_truthy(v)) {
            total += json_bytes(value);
        }
    }
    total
}

/// Encoded size of a value; arrays are summed item by item with separators.
fn json_bytes(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::Array(items) => {
            let separators = items.len().saturating_sub(1) as u64;
            2 + separators + items.iter().map(encoded_len).sum::<u64>()
        }
        other => encoded_len(other),
    }
}

fn encoded_len(value: &Value) -> u64 {
    serde_json::to_string(value).map_or(0, |s| s.len() as u64)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
