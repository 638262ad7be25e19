use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{StoreError, StoreResult};
use crate::traits::{entry_size, KeyValueStore};

/// In-memory, capacity-bounded key/value store.
///
/// Intended for tests and embedding. All entries live in a `BTreeMap` behind
/// a `RwLock`; batch reads and writes run under one guard.
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    capacity: u64,
}

impl MemoryStore {
    /// Create an empty store with the given hard capacity in bytes.
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            capacity,
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.read_guard().map(|m| m.len()).unwrap_or(0)
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all entries.
    pub fn clear(&self) -> StoreResult<()> {
        self.write_guard()?.clear();
        Ok(())
    }

    fn read_guard(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write_guard(&self) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn total(map: &BTreeMap<String, String>) -> u64 {
        map.iter().map(|(k, v)| entry_size(k, v)).sum()
    }

    /// Fail with `CapacityExceeded` if replacing `key` with `value` would
    /// overflow.
    fn check_fits(&self, map: &BTreeMap<String, String>, key: &str, value: &str) -> StoreResult<()> {
        let used = Self::total(map);
        let old = map.get(key).map(|v| entry_size(key, v)).unwrap_or(0);
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
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.read_guard()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut map = self.write_guard()?;
        self.check_fits(&map, key, value)?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn compare_and_set(&self, key: &str, expected: &str, value: &str) -> StoreResult<bool> {
        let mut map = self.write_guard()?;
        if map.get(key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        self.check_fits(&map, key, value)?;
        map.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.write_guard()?.remove(key).is_some())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.read_guard()?.keys().cloned().collect())
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn used_bytes(&self) -> StoreResult<u64> {
        Ok(Self::total(&*self.read_guard()?))
    }

    fn get_many(&self, keys: &[&str]) -> StoreResult<Vec<Option<String>>> {
        let map = self.read_guard()?;
        Ok(keys.iter().map(|k| map.get(*k).cloned()).collect())
    }

    fn set_many(&self, entries: &[(String, String)]) -> StoreResult<()> {
        let mut map = self.write_guard()?;

        // Project the post-batch usage before touching anything.
        let mut projected = Self::total(&map);
        let mut staged: BTreeMap<&str, &str> = BTreeMap::new();
        for (key, value) in entries {
            let previous = match staged.get(key.as_str()) {
                Some(v) => entry_size(key, v),
                None => map.get(key).map(|v| entry_size(key, v)).unwrap_or(0),
            };
            projected = projected - previous + entry_size(key, value);
            staged.insert(key, value);
        }
        if projected > self.capacity {
            let required: u64 = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
            return Err(StoreError::CapacityExceeded {
                key: entries.first().map(|(k, _)| k.clone()).unwrap_or_default(),
                required,
                available: self.capacity.saturating_sub(Self::total(&map)),
            });
        }

        for (key, value) in staged {
            map.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn entries(&self) -> StoreResult<Vec<(String, String)>> {
        Ok(self
            .read_guard()?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entry_count", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
