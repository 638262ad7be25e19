use crate::error::StoreResult;

/// Bytes charged against capacity for one entry.
pub fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

/// Durable, byte-capacity-bounded key/value store.
///
/// All implementations must satisfy these invariants:
/// - `used_bytes() <= capacity()` after every operation. A write that would
///   break this fails with `CapacityExceeded` and changes nothing.
/// - `keys()` returns keys in ascending order.
/// - `used_bytes()` is computed from current contents, not a cached counter.
/// - All I/O errors are propagated, never silently ignored.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Returns `Ok(None)` if the key does not exist.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Create or replace a value.
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Replace `key`'s value only if it currently equals `expected`.
    ///
    /// Returns `Ok(false)`, changing nothing, if the key is absent or holds
    /// something else. The comparison and the write happen under one guard.
    fn compare_and_set(&self, key: &str, expected: &str, value: &str) -> StoreResult<bool>;

    /// Delete a key. Returns `true` if it existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// All keys, sorted ascending.
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// Hard capacity in bytes.
    fn capacity(&self) -> u64;

    /// Total bytes currently charged (sum of [`entry_size`] over entries).
    fn used_bytes(&self) -> StoreResult<u64>;

    /// Bytes still available before the hard capacity.
    fn available_bytes(&self) -> StoreResult<u64> {
        Ok(self.capacity().saturating_sub(self.used_bytes()?))
    }

    /// Check whether a key exists.
    fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Charged size of one entry, if present.
    fn entry_size(&self, key: &str) -> StoreResult<Option<u64>> {
        Ok(self.get(key)?.map(|v| entry_size(key, &v)))
    }

    /// Read several keys.
    ///
    /// Default implementation calls `get()` for each key. Backends override
    /// this to read under a single guard so callers see one consistent
    /// state.
    fn get_many(&self, keys: &[&str]) -> StoreResult<Vec<Option<String>>> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    /// Write several entries.
    ///
    /// Default implementation calls `set()` for each entry and is not
    /// atomic. Backends override this to check capacity for the whole batch
    /// before writing anything.
    fn set_many(&self, entries: &[(String, String)]) -> StoreResult<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Every entry, in key order.
    fn entries(&self) -> StoreResult<Vec<(String, String)>> {
        let mut out = Vec::new();
        for key in self.keys()? {
            if let Some(value) = self.get(&key)? {
                out.push((key, value));
            }
        }
        Ok(out)
    }
}
