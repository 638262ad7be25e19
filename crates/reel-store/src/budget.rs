//! Byte-budget adapter over another store.
//!
//! A backend's own capacity is often far larger than the budget an
//! application wants to spend on it. [`BudgetedStore`] reports
//! `min(budget, inner.capacity())` as its capacity and rejects any write
//! that would grow usage past it with `CapacityExceeded`, the same signal
//! the backends raise at their hard limit.
//!
//! Writes through the adapter are serialized so two of them cannot both
//! pass the check and together overflow. Writers that go to the inner
//! store directly are not covered.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{StoreError, StoreResult};
use crate::traits::{entry_size, KeyValueStore};

/// A [`KeyValueStore`] whose capacity is capped at a byte budget.
pub struct BudgetedStore {
    inner: Arc<dyn KeyValueStore>,
    budget: u64,
    writes: Mutex<()>,
}

impl BudgetedStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, budget: u64) -> Self {
        Self {
            inner,
            budget,
            writes: Mutex::new(()),
        }
    }

    /// The configured budget, before clamping to the inner capacity.
    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn inner(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner
    }

    fn write_gate(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.writes
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    /// Reject a change that ends above the budget and grows usage.
    ///
    /// Writes that shrink or keep usage are let through even over budget,
    /// so a store that starts oversized can still be brought back under.
    fn check(&self, key: &str, used: u64, old: u64, new: u64, required: u64) -> StoreResult<()> {
        let after = used - old.min(used) + new;
        if after > self.capacity() && after > used {
            return Err(StoreError::CapacityExceeded {
                key: key.to_string(),
                required,
                available: self.capacity().saturating_sub(used - old.min(used)),
            });
        }
        Ok(())
    }

    fn check_one(&self, key: &str, value: &str) -> StoreResult<()> {
        let used = self.inner.used_bytes()?;
        let old = self.inner.entry_size(key)?.unwrap_or(0);
        let new = entry_size(key, value);
        self.check(key, used, old, new, new)
    }
}

impl KeyValueStore for BudgetedStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let _gate = self.write_gate()?;
        self.check_one(key, value)?;
        self.inner.set(key, value)
    }

    fn compare_and_set(&self, key: &str, expected: &str, value: &str) -> StoreResult<bool> {
        let _gate = self.write_gate()?;
        if self.inner.get(key)?.as_deref() != Some(expected) {
            return Ok(false);
        }
        self.check_one(key, value)?;
        self.inner.compare_and_set(key, expected, value)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key)
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        self.inner.keys()
    }

    fn capacity(&self) -> u64 {
        self.budget.min(self.inner.capacity())
    }

    fn used_bytes(&self) -> StoreResult<u64> {
        self.inner.used_bytes()
    }

    fn contains(&self, key: &str) -> StoreResult<bool> {
        self.inner.contains(key)
    }

    fn entry_size(&self, key: &str) -> StoreResult<Option<u64>> {
        self.inner.entry_size(key)
    }

    fn get_many(&self, keys: &[&str]) -> StoreResult<Vec<Option<String>>> {
        self.inner.get_many(keys)
    }

    fn set_many(&self, entries: &[(String, String)]) -> StoreResult<()> {
        let _gate = self.write_gate()?;
        let used = self.inner.used_bytes()?;
        let mut old_total = 0u64;
        let mut staged: BTreeMap<&str, u64> = BTreeMap::new();
        for (key, value) in entries {
            if !staged.contains_key(key.as_str()) {
                old_total += self.inner.entry_size(key)?.unwrap_or(0);
            }
            staged.insert(key, entry_size(key, value));
        }
        let new_total: u64 = staged.values().sum();
        let required: u64 = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
        let first = entries.first().map(|(k, _)| k.as_str()).unwrap_or_default();
        self.check(first, used, old_total, new_total, required)?;
        self.inner.set_many(entries)
    }

    fn entries(&self) -> StoreResult<Vec<(String, String)>> {
        self.inner.entries()
    }
}

impl std::fmt::Debug for BudgetedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetedStore")
            .field("budget", &self.budget)
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
