//! Artifact records and their persisted form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use reel_store::BlobHandle;
use reel_types::{ArtifactId, ArtifactKind, ProjectId, Timestamp};

/// Caller-supplied opaque metadata.
pub type Metadata = BTreeMap<String, serde_json::Value>;

const RECORD_PREFIX: &str = "reel:project:";
const RECORD_SUFFIX: &str = ":artifacts";

/// Primary-store key holding a project's artifact set.
///
/// The suffix keeps project ids like `x_temp` from matching the transient
/// key conventions.
pub fn record_key(project: &ProjectId) -> String {
    format!("{RECORD_PREFIX}{project}{RECORD_SUFFIX}")
}

/// Inverse of [`record_key`].
pub fn project_of_record_key(key: &str) -> Option<&str> {
    key.strip_prefix(RECORD_PREFIX)?.strip_suffix(RECORD_SUFFIX)
}

/// Where an artifact's bytes live.
///
/// Demotion is one-way: nothing in this crate turns a `Referenced` payload
/// back into `Materialized`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Payload {
    /// The real bytes, stored base64-encoded in the primary store.
    Materialized(#[serde(with = "base64_bytes")] Vec<u8>),
    /// A reference handle; the bytes are outside the primary store.
    Referenced(BlobHandle),
}

impl Payload {
    pub fn is_materialized(&self) -> bool {
        matches!(self, Self::Materialized(_))
    }

    /// Materialized bytes, if any.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Materialized(b) => Some(b),
            Self::Referenced(_) => None,
        }
    }

    pub fn handle(&self) -> Option<&BlobHandle> {
        match self {
            Self::Materialized(_) => None,
            Self::Referenced(h) => Some(h),
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Materialized(b) => write!(f, "Materialized({} bytes)", b.len()),
            Self::Referenced(h) => write!(f, "Referenced({h})"),
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// One generated binary payload owned by a project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: ArtifactId,
    pub project_id: ProjectId,
    pub kind: ArtifactKind,
    pub mime: String,
    pub payload: Payload,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl Artifact {
    pub fn is_materialized(&self) -> bool {
        self.payload.is_materialized()
    }

    /// Bytes held in the primary store (zero when referenced).
    pub fn materialized_len(&self) -> u64 {
        self.payload.bytes().map(|b| b.len() as u64).unwrap_or(0)
    }
}

/// All artifacts of one project plus its access recency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectArtifactSet {
    pub project_id: ProjectId,
    pub last_accessed_at: Timestamp,
    pub artifacts: Vec<Artifact>,
}

impl ProjectArtifactSet {
    pub fn new(project_id: ProjectId, now: Timestamp) -> Self {
        Self {
            project_id,
            last_accessed_at: now,
            artifacts: Vec::new(),
        }
    }

    pub fn materialized_count(&self) -> usize {
        self.artifacts.iter().filter(|a| a.is_materialized()).count()
    }

    /// True if every artifact is materialized. An empty set counts.
    pub fn fully_materialized(&self) -> bool {
        self.artifacts.iter().all(Artifact::is_materialized)
    }

    pub fn get(&self, id: &ArtifactId) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| &a.id == id)
    }
}

/// Best-effort MIME type from leading magic bytes.
pub fn sniff_mime(data: &[u8]) -> &'static str {
    match data {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "application/octet-stream",
    }
}
