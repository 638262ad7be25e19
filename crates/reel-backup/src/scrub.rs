//! Removal of binary content from snapshot payloads.
//!
//! Snapshots carry text and metadata only. Generated image and video lists
//! are reduced to descriptive summaries, and any `data:` URL string left
//! anywhere in the payload is dropped.

use serde_json::{Map, Value};

use crate::snapshot::SnapshotPayload;

/// Key holding generated images (with inline binaries).
pub const IMAGES_KEY: &str = "generatedImages";
/// Key holding generated videos (with inline binaries).
pub const VIDEOS_KEY: &str = "generatedVideos";
/// Summary written in place of [`IMAGES_KEY`].
pub const IMAGES_LIST_KEY: &str = "generatedImagesList";
/// Summary written in place of [`VIDEOS_KEY`].
pub const VIDEOS_LIST_KEY: &str = "generatedVideosList";

const IMAGE_FIELDS: &[&str] = &["id", "description", "prompt", "timestamp", "type"];
const VIDEO_FIELDS: &[&str] = &[
    "id",
    "prompt",
    "englishPrompt",
    "koreanPrompt",
    "timestamp",
    "duration",
    "ratio",
    "model",
];

const DATA_URL_PREFIX: &str = "data:";

/// Strip binaries from a payload.
pub fn scrub_payload(mut payload: SnapshotPayload) -> SnapshotPayload {
    if let Some(images) = payload.remove(IMAGES_KEY) {
        payload.insert(
            IMAGES_LIST_KEY.to_string(),
            summarize(images, IMAGE_FIELDS, "image", "hasImage"),
        );
    }
    if let Some(videos) = payload.remove(VIDEOS_KEY) {
        payload.insert(
            VIDEOS_LIST_KEY.to_string(),
            summarize(videos, VIDEO_FIELDS, "video", "hasVideo"),
        );
    }
    payload
        .into_iter()
        .filter_map(|(k, v)| strip_data_urls(v).map(|v| (k, v)))
        .collect()
}

/// Returns `true` if `value` still holds a `data:` URL anywhere.
pub fn contains_binary(value: &Value) -> bool {
    match value {
        Value::String(s) => s.starts_with(DATA_URL_PREFIX),
        Value::Array(items) => items.iter().any(contains_binary),
        Value::Object(map) => map.values().any(contains_binary),
        _ => false,
    }
}

fn summarize(list: Value, fields: &[&str], binary_field: &str, flag: &str) -> Value {
    let Value::Array(items) = list else {
        return Value::Array(Vec::new());
    };
    let summaries = items
        .into_iter()
        .filter_map(|item| {
            let Value::Object(obj) = item else {
                return None;
            };
            let mut out = Map::new();
            for field in fields {
                if let Some(v) = obj.get(*field) {
                    out.insert((*field).to_string(), v.clone());
                }
            }
            let has_binary = obj.get(binary_field).map(is_truthy).unwrap_or(false);
            out.insert(flag.to_string(), Value::Bool(has_binary));
            Some(Value::Object(out))
        })
        .collect();
    Value::Array(summaries)
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `None` means the value itself was a data URL.
fn strip_data_urls(value: Value) -> Option<Value> {
    match value {
        Value::String(s) if s.starts_with(DATA_URL_PREFIX) => None,
        Value::Array(items) => Some(Value::Array(
            items.into_iter().filter_map(strip_data_urls).collect(),
        )),
        Value::Object(map) => Some(Value::Object(
            map.into_iter()
                .filter_map(|(k, v)| strip_data_urls(v).map(|v| (k, v)))
                .collect(),
        )),
        other => Some(other),
    }
}
