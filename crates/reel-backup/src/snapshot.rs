use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use reel_types::BackupId;

/// Structured metadata captured by a snapshot, keyed by metadata key.
pub type SnapshotPayload = BTreeMap<String, Value>;

/// How a snapshot came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Manual,
    Automatic,
    Scheduled,
}

impl BackupKind {
    pub const ALL: [BackupKind; 3] = [Self::Manual, Self::Automatic, Self::Scheduled];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
            Self::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown backup kind: {s}"))
    }
}

/// Immutable point-in-time copy of project metadata. Never holds artifact
/// binaries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub id: BackupId,
    /// Creation time, Unix milliseconds.
    pub timestamp: u64,
    pub kind: BackupKind,
    pub description: String,
    /// Serialized size of `payload`.
    pub size_bytes: u64,
    #[serde(default)]
    pub item_count: usize,
    pub payload: SnapshotPayload,
}

impl BackupSnapshot {
    /// Build a snapshot, deriving its size and item count.
    pub fn new(
        id: BackupId,
        timestamp: u64,
        kind: BackupKind,
        description: impl Into<String>,
        payload: SnapshotPayload,
    ) -> Self {
        let size_bytes = serde_json::to_string(&payload)
            .map(|s| s.len() as u64)
            .unwrap_or(0);
        let item_count = count_items(&payload);
        Self {
            id,
            timestamp,
            kind,
            description: description.into(),
            size_bytes,
            item_count,
            payload,
        }
    }

    pub fn summary(&self) -> BackupSummary {
        BackupSummary {
            id: self.id,
            timestamp: self.timestamp,
            kind: self.kind,
            description: self.description.clone(),
            size_bytes: self.size_bytes,
            item_count: self.item_count,
        }
    }
}

/// A snapshot without its payload, for listings and reports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub id: BackupId,
    pub timestamp: u64,
    pub kind: BackupKind,
    pub description: String,
    pub size_bytes: u64,
    pub item_count: usize,
}

/// Arrays count their elements, objects their fields, other non-empty
/// values one.
pub fn count_items(payload: &SnapshotPayload) -> usize {
    payload
        .values()
        .map(|v| match v {
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            Value::Null | Value::Bool(false) => 0,
            Value::String(s) if s.is_empty() => 0,
            _ => 1,
        })
        .sum()
}
