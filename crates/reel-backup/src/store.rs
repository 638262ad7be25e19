//! Secondary storage for snapshots.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use tracing::{debug, warn};

use reel_types::BackupId;

use crate::error::{BackupError, BackupResult};
use crate::snapshot::BackupSnapshot;

/// Where snapshots live. Independent of the primary store's capacity.
pub trait BackupStore: Send + Sync {
    /// Insert or replace a snapshot.
    fn put(&self, snapshot: &BackupSnapshot) -> BackupResult<()>;

    fn get(&self, id: &BackupId) -> BackupResult<Option<BackupSnapshot>>;

    /// Returns `true` if the snapshot existed.
    fn delete(&self, id: &BackupId) -> BackupResult<bool>;

    /// Every snapshot, newest first.
    fn list(&self) -> BackupResult<Vec<BackupSnapshot>>;
}

pub(crate) fn newest_first(snapshots: &mut [BackupSnapshot]) {
    snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
}

/// In-memory snapshot store.
#[derive(Default)]
pub struct MemoryBackupStore {
    snapshots: RwLock<BTreeMap<BackupId, BackupSnapshot>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackupStore for MemoryBackupStore {
    fn put(&self, snapshot: &BackupSnapshot) -> BackupResult<()> {
        let mut map = self.snapshots.write().unwrap_or_else(|e| e.into_inner());
        map.insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    fn get(&self, id: &BackupId) -> BackupResult<Option<BackupSnapshot>> {
        let map = self.snapshots.read().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(id).cloned())
    }

    fn delete(&self, id: &BackupId) -> BackupResult<bool> {
        let mut map = self.snapshots.write().unwrap_or_else(|e| e.into_inner());
        Ok(map.remove(id).is_some())
    }

    fn list(&self) -> BackupResult<Vec<BackupSnapshot>> {
        let map = self.snapshots.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = map.values().cloned().collect();
        newest_first(&mut out);
        Ok(out)
    }
}

impl std::fmt::Debug for MemoryBackupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .snapshots
            .read()
            .map(|m| m.len())
            .unwrap_or_default();
        f.debug_struct("MemoryBackupStore")
            .field("snapshots", &count)
            .finish()
    }
}

const SNAPSHOT_EXT: &str = "json";

/// One pretty-printed JSON file per snapshot, named `<id>.json`.
///
/// Files are written to a temporary file and renamed into place.
/// Unreadable files are skipped by [`list`](BackupStore::list) with a
/// warning, and reported as [`BackupError::Corrupt`] by
/// [`get`](BackupStore::get).
pub struct DirBackupStore {
    root: PathBuf,
    writes: Mutex<()>,
}

impl DirBackupStore {
    pub fn open(root: impl AsRef<Path>) -> BackupResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "backup dir opened");
        Ok(Self {
            root,
            writes: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &BackupId) -> PathBuf {
        self.root.join(format!("{id}.{SNAPSHOT_EXT}"))
    }

    fn read_file(path: &Path) -> BackupResult<Option<BackupSnapshot>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| BackupError::Corrupt {
                name: path.display().to_string(),
                reason: e.to_string(),
            })
    }
}

impl BackupStore for DirBackupStore {
    fn put(&self, snapshot: &BackupSnapshot) -> BackupResult<()> {
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| BackupError::Serialization(e.to_string()))?;
        let _guard = self.writes.lock().unwrap_or_else(|e| e.into_inner());
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(&snapshot.id))
            .map_err(|e| e.error)?;
        Ok(())
    }

    fn get(&self, id: &BackupId) -> BackupResult<Option<BackupSnapshot>> {
        Self::read_file(&self.path_for(id))
    }

    fn delete(&self, id: &BackupId) -> BackupResult<bool> {
        let _guard = self.writes.lock().unwrap_or_else(|e| e.into_inner());
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> BackupResult<Vec<BackupSnapshot>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().map(|e| e != SNAPSHOT_EXT).unwrap_or(true) {
                continue;
            }
            match Self::read_file(&path) {
                Ok(Some(snapshot)) => out.push(snapshot),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable snapshot"),
            }
        }
        newest_first(&mut out);
        Ok(out)
    }
}

impl std::fmt::Debug for DirBackupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirBackupStore")
            .field("root", &self.root)
            .finish()
    }
}
