//! Lightweight reference handles for demoted payloads.
//!
//! A [`BlobHandle`] stands in for binary content that has been moved out of
//! the capacity-bounded store. Handles are process-local (like object URLs):
//! they resolve while the registry that minted them is alive and must be
//! released when the owning artifact goes away.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Scheme prefix of every handle minted by [`BlobRegistry`].
pub const HANDLE_PREFIX: &str = "blob:reel/";

/// Opaque reference to a demoted payload.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobHandle(String);

impl BlobHandle {
    /// Wrap a raw handle string (for handles reloaded from storage).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw handle string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this handle was minted by a [`BlobRegistry`].
    pub fn is_registry_handle(&self) -> bool {
        self.0.starts_with(HANDLE_PREFIX)
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobHandle({})", self.0)
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Converts payloads into reference handles that do not occupy primary
/// store capacity.
pub trait BlobReferenceFactory: Send + Sync {
    /// Take ownership of `data` and return a handle to it.
    fn create(&self, data: &[u8], mime: &str) -> BlobHandle;

    /// Dereference a handle. Returns `None` for released or foreign handles.
    fn resolve(&self, handle: &BlobHandle) -> Option<Vec<u8>>;

    /// Release a handle. Returns `true` if it was live.
    fn release(&self, handle: &BlobHandle) -> bool;

    /// Number of live handles.
    fn live_count(&self) -> usize;
}

struct BlobEntry {
    data: Arc<[u8]>,
    mime: String,
}

/// In-process [`BlobReferenceFactory`].
#[derive(Default)]
pub struct BlobRegistry {
    blobs: RwLock<HashMap<String, BlobEntry>>,
}

impl BlobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes held by live handles.
    pub fn held_bytes(&self) -> u64 {
        self.blobs
            .read()
            .map(|m| m.values().map(|b| b.data.len() as u64).sum())
            .unwrap_or(0)
    }

    /// MIME type recorded for a live handle.
    pub fn mime_of(&self, handle: &BlobHandle) -> Option<String> {
        self.blobs
            .read()
            .ok()?
            .get(handle.as_str())
            .map(|b| b.mime.clone())
    }
}

impl BlobReferenceFactory for BlobRegistry {
    fn create(&self, data: &[u8], mime: &str) -> BlobHandle {
        let raw = format!("{HANDLE_PREFIX}{}", uuid::Uuid::now_v7());
        let entry = BlobEntry {
            data: Arc::from(data),
            mime: mime.to_string(),
        };
        // The registry map is valid after a panic; keep serving.
        let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
        blobs.insert(raw.clone(), entry);
        debug!(handle = %raw, bytes = data.len(), "blob handle created");
        BlobHandle(raw)
    }

    fn resolve(&self, handle: &BlobHandle) -> Option<Vec<u8>> {
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        blobs.get(handle.as_str()).map(|b| b.data.to_vec())
    }

    fn release(&self, handle: &BlobHandle) -> bool {
        let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
        let released = blobs.remove(handle.as_str()).is_some();
        if !released && handle.is_registry_handle() {
            warn!(handle = %handle, "release of unknown blob handle");
        }
        released
    }

    fn live_count(&self) -> usize {
        self.blobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl fmt::Debug for BlobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobRegistry")
            .field("live", &self.live_count())
            .field("held_bytes", &self.held_bytes())
            .finish()
    }
}
