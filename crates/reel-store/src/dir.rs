//! Directory-backed key/value store.
//!
//! [`DirStore`] keeps one file per key under a root directory. File names are
//! the hex encoding of the key plus a `.val` extension, so any key is a valid
//! file name. Writes go to a temporary file in the same directory and are
//! renamed into place, so a crash never leaves a half-written value.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{entry_size, KeyValueStore};

const VALUE_EXT: &str = "val";

/// Capacity-bounded store persisting each entry as a file.
pub struct DirStore {
    root: PathBuf,
    capacity: u64,
    /// Serializes writers against readers; the files are the state.
    gate: RwLock<()>,
}

impl DirStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>, capacity: u64) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), capacity, "dir store opened");
        Ok(Self {
            root,
            capacity,
            gate: RwLock::new(()),
        })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{VALUE_EXT}", hex::encode(key.as_bytes())))
    }

    fn key_from_path(path: &Path) -> Option<String> {
        if path.extension().map(|e| e != VALUE_EXT).unwrap_or(true) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let bytes = hex::decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }

    fn shared(&self) -> StoreResult<RwLockReadGuard<'_, ()>> {
        self.gate
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn exclusive(&self) -> StoreResult<RwLockWriteGuard<'_, ()>> {
        self.gate
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn read_value(&self, key: &str) -> StoreResult<Option<String>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn scan(&self) -> StoreResult<Vec<(String, u64)>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if let Some(key) = Self::key_from_path(&path) {
                let len = entry.metadata()?.len();
                out.push((key, len));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn total(&self) -> StoreResult<u64> {
        Ok(self
            .scan()?
            .iter()
            .map(|(k, len)| k.len() as u64 + len)
            .sum())
    }

    fn size_on_disk(&self, key: &str) -> StoreResult<u64> {
        match fs::metadata(self.path_for(key)) {
            Ok(meta) => Ok(key.len() as u64 + meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn check_fits(&self, key: &str, value: &str) -> StoreResult<()> {
        let used = self.total()?;
        let old = self.size_on_disk(key)?;
        let new = entry_size(key, value);
        if used - old + new > self.capacity {
            return Err(StoreError::CapacityExceeded {
                key: key.to_string(),
                required: new,
                available: self.capacity.saturating_sub(used - old),
            });
        }
        Ok(())
    }

    fn write_file(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(value.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(key)).map_err(|e| e.error)?;
        Ok(())
    }
}

impl KeyValueStore for DirStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let _guard = self.shared()?;
        self.read_value(key)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let _guard = self.exclusive()?;
        self.check_fits(key, value)?;
        self.write_file(key, value)
    }

    fn compare_and_set(&self, key: &str, expected: &str, value: &str) -> StoreResult<bool> {
        let _guard = self.exclusive()?;
        if self.read_value(key)?.as_deref() != Some(expected) {
            return Ok(false);
        }
        self.check_fits(key, value)?;
        self.write_file(key, value)?;
        Ok(true)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let _guard = self.exclusive()?;
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let _guard = self.shared()?;
        Ok(self.scan()?.into_iter().map(|(k, _)| k).collect())
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn used_bytes(&self) -> StoreResult<u64> {
        let _guard = self.shared()?;
        self.total()
    }

    fn get_many(&self, keys: &[&str]) -> StoreResult<Vec<Option<String>>> {
        let _guard = self.shared()?;
        keys.iter().map(|k| self.read_value(k)).collect()
    }

    fn set_many(&self, entries: &[(String, String)]) -> StoreResult<()> {
        let _guard = self.exclusive()?;
        let mut projected = self.total()?;
        let mut seen: Vec<(&str, u64)> = Vec::new();
        for (key, value) in entries {
            let previous = match seen.iter().rev().find(|(k, _)| *k == key.as_str()) {
                Some((_, size)) => *size,
                None => self.size_on_disk(key)?,
            };
            let size = entry_size(key, value);
            projected = projected - previous + size;
            seen.push((key, size));
        }
        if projected > self.capacity {
            let required: u64 = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
            return Err(StoreError::CapacityExceeded {
                key: entries.first().map(|(k, _)| k.clone()).unwrap_or_default(),
                required,
                available: self.capacity.saturating_sub(self.total()?),
            });
        }
        for (key, value) in entries {
            self.write_file(key, value)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DirStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirStore")
            .field("root", &self.root)
            .field("capacity", &self.capacity)
            .finish()
    }
}
