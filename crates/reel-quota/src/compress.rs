//! Structural optimization of JSON entries.
//!
//! "Compression" here is not a byte codec: it strips `null` and empty-string
//! fields from objects (recursively) and re-serializes compactly. The
//! optimized form is kept only when strictly smaller than the original, and
//! a `<key>_compressed` tag records that it was applied so the pass is
//! idempotent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Drop `null` and `""` fields from every object in `value`.
///
/// Array elements are optimized but never removed, so positions are stable.
pub fn optimize_structure(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                if is_empty_field(&v) {
                    continue;
                }
                out.insert(k, optimize_structure(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(optimize_structure).collect()),
        other => other,
    }
}

fn is_empty_field(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Optimize a serialized JSON value. Returns the new text only if it is
/// strictly shorter; non-JSON input yields `None`.
pub(crate) fn shrink(raw: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(raw).ok()?;
    let optimized = serde_json::to_string(&optimize_structure(parsed)).ok()?;
    (optimized.len() < raw.len()).then_some(optimized)
}

/// One entry the compression pass would rewrite.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionCandidate {
    pub key: String,
    pub original_bytes: u64,
    pub optimized_bytes: u64,
}

/// Dry-run result of the compression pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionAnalysis {
    pub candidates: Vec<CompressionCandidate>,
    /// Bytes of all eligible (oversized, untagged) entries.
    pub eligible_bytes: u64,
    /// Eligible bytes over total used bytes.
    pub ratio: f64,
    /// Bytes the pass would reclaim.
    pub potential_savings: u64,
}

/// Outcome of an executed compression pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionReport {
    pub compressed_count: usize,
    pub saved_bytes: u64,
}
