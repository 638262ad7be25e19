//! Access to project metadata held in the primary store.

use std::sync::Arc;

use serde_json::Value;

use reel_store::KeyValueStore;

use crate::error::{BackupError, BackupResult};
use crate::scrub::{IMAGES_KEY, IMAGES_LIST_KEY, VIDEOS_KEY, VIDEOS_LIST_KEY};
use crate::snapshot::SnapshotPayload;

/// Text and structured metadata keys captured by every snapshot.
pub const METADATA_KEYS: &[&str] = &[
    "story",
    "characterList",
    "scenarioPrompt",
    "storySummary",
    "finalScenario",
    "generatedProjectData",
    "episodeStructureData",
    "generatedTextCards",
    "generatedSceneTextCards",
    "promptTemplates",
    IMAGES_LIST_KEY,
    VIDEOS_LIST_KEY,
];

/// Keys whose values carry binaries and are scrubbed before storage.
pub const BINARY_KEYS: &[&str] = &[IMAGES_KEY, VIDEOS_KEY];

/// Read/write access to project metadata by well-known key.
pub trait MetadataStore: Send + Sync {
    /// Read every present key of `keys` from one consistent state.
    fn read(&self, keys: &[&str]) -> BackupResult<SnapshotPayload>;

    /// Write every entry, all or nothing.
    fn write(&self, entries: &SnapshotPayload) -> BackupResult<()>;
}

/// [`MetadataStore`] over a [`KeyValueStore`].
///
/// Values that parse as JSON are returned parsed; anything else is returned
/// as a JSON string holding the raw text. [`write`](MetadataStore::write)
/// inverts this, so a read after a write returns equal values.
pub struct KvMetadataStore {
    store: Arc<dyn KeyValueStore>,
}

impl KvMetadataStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

impl MetadataStore for KvMetadataStore {
    fn read(&self, keys: &[&str]) -> BackupResult<SnapshotPayload> {
        let values = self.store.get_many(keys)?;
        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, raw)| raw.map(|raw| (key.to_string(), decode(raw))))
            .collect())
    }

    fn write(&self, entries: &SnapshotPayload) -> BackupResult<()> {
        let batch = entries
            .iter()
            .map(|(k, v)| encode(v).map(|raw| (k.clone(), raw)))
            .collect::<BackupResult<Vec<_>>>()?;
        self.store.set_many(&batch)?;
        Ok(())
    }
}

impl std::fmt::Debug for KvMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvMetadataStore").finish_non_exhaustive()
    }
}

fn decode(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn encode(value: &Value) -> BackupResult<String> {
    match value {
        // Plain text that was never JSON goes back verbatim.
        Value::String(s) if serde_json::from_str::<Value>(s).is_err() => Ok(s.clone()),
        other => serde_json::to_string(other).map_err(|e| BackupError::Serialization(e.to_string())),
    }
}
