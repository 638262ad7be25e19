use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use reel_store::{entry_size, keys, BudgetedStore, KeyValueStore, StoreError};
use reel_types::Clock;

use crate::analysis::{
    KeyDetails, KeyUsage, OptimizationAnalysis, OptimizationReport, StorageStats, ValueShape,
};
use crate::compress::{self, CompressionAnalysis, CompressionCandidate, CompressionReport};
use crate::config::QuotaConfig;
use crate::dedup::{self, DedupAnalysis, DedupReport};
use crate::error::{QuotaError, QuotaResult};
use crate::eviction::{self, EvictionReport, EvictionTarget};
use crate::status::StorageStatus;
use crate::sweep::{self, CleanupReport};

const PREVIEW_CHARS: usize = 200;
const LARGEST_ITEMS: usize = 10;

/// What [`QuotaManager::set_item`] did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    pub key: String,
    /// Charged size of the entry as written.
    pub bytes: u64,
    pub compressed: bool,
    /// Present if a cleanup ran before or during the write.
    pub cleanup: Option<CleanupReport>,
}

/// Enforces the byte budget of the primary store.
///
/// The store is wrapped in a [`BudgetedStore`], so every write made through
/// [`store`](Self::store) fails with `CapacityExceeded` past `max_bytes()`
/// even when the backend could hold more. Usage is recomputed from the
/// store on every call.
///
/// The reclaiming passes and `set_item`/`delete_key` are serialized against
/// each other. A pass rewrites an entry only through `compare_and_set`
/// against the value it planned from, so a concurrent writer is never
/// overwritten. Service-owned `reel:*` records are left to their owners.
pub struct QuotaManager {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: QuotaConfig,
    passes: Mutex<()>,
}

impl QuotaManager {
    /// Build a manager over `store`. Fails on invalid configuration.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: QuotaConfig,
    ) -> QuotaResult<Self> {
        config.validate()?;
        if store.capacity() < config.max_bytes {
            warn!(
                capacity = store.capacity(),
                max_bytes = config.max_bytes,
                "store capacity is below the configured budget; using capacity"
            );
        }
        let store: Arc<dyn KeyValueStore> = Arc::new(BudgetedStore::new(store, config.max_bytes));
        Ok(Self {
            store,
            clock,
            config,
            passes: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// The budgeted view of the primary store. Writes through it cannot
    /// push usage past [`max_bytes`](Self::max_bytes).
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Effective ceiling: the configured budget, clamped to store capacity.
    pub fn max_bytes(&self) -> u64 {
        self.store.capacity()
    }

    /// Usage level that triggers a pre-write cleanup.
    pub fn cleanup_trigger_bytes(&self) -> u64 {
        (self.max_bytes() as f64 * self.config.cleanup_threshold_ratio) as u64
    }

    fn serialize_passes(&self) -> MutexGuard<'_, ()> {
        self.passes.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ----------------------------------------------------------------
    // Status and usage
    // ----------------------------------------------------------------

    /// Current usage and health.
    pub fn storage_status(&self) -> QuotaResult<StorageStatus> {
        let used = self.store.used_bytes()?;
        Ok(StorageStatus::compute(used, self.max_bytes(), &self.config))
    }

    /// Usage plus the largest entries.
    pub fn storage_stats(&self) -> QuotaResult<StorageStats> {
        let usage = self.detailed_usage()?;
        let status = self.storage_status()?;
        Ok(StorageStats {
            status,
            item_count: usage.len(),
            largest: usage.into_iter().take(LARGEST_ITEMS).collect(),
        })
    }

    /// Per-key usage, largest first.
    pub fn detailed_usage(&self) -> QuotaResult<Vec<KeyUsage>> {
        let entries = self.store.entries()?;
        let total: u64 = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
        let mut usage: Vec<KeyUsage> = entries
            .iter()
            .map(|(k, v)| key_usage(k, v, total))
            .collect();
        usage.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.key.cmp(&b.key)));
        Ok(usage)
    }

    /// Details for one key, or `None` if absent.
    pub fn key_details(&self, key: &str) -> QuotaResult<Option<KeyDetails>> {
        let Some(value) = self.store.get(key)? else {
            return Ok(None);
        };
        let total = self.store.used_bytes()?;
        let compressed = self.store.contains(&keys::compressed_tag_key(key))?;
        Ok(Some(KeyDetails {
            usage: key_usage(key, &value, total),
            compressed,
            transient: keys::is_transient_key(key),
            embedded_timestamp_ms: keys::embedded_timestamp_ms(key),
            preview: value.chars().take(PREVIEW_CHARS).collect(),
        }))
    }

    /// Delete a key and its compression tag. Returns `true` if the key
    /// existed.
    pub fn delete_key(&self, key: &str) -> QuotaResult<bool> {
        let _pass = self.serialize_passes();
        let existed = self.store.delete(key)?;
        self.store.delete(&keys::compressed_tag_key(key))?;
        if existed {
            info!(key, "key deleted");
        }
        Ok(existed)
    }

    // ----------------------------------------------------------------
    // Budgeted writes
    // ----------------------------------------------------------------

    /// Run a cleanup if writing `required` more bytes would cross the
    /// cleanup threshold. Returns the cleanup report if one ran.
    pub fn ensure_headroom(&self, required: u64) -> QuotaResult<Option<CleanupReport>> {
        let _pass = self.serialize_passes();
        self.headroom_locked(required)
    }

    fn headroom_locked(&self, required: u64) -> QuotaResult<Option<CleanupReport>> {
        let used = self.store.used_bytes()?;
        let trigger = self.cleanup_trigger_bytes();
        if used.saturating_add(required) <= trigger {
            return Ok(None);
        }
        debug!(used, required, trigger, "cleanup threshold crossed");
        self.sweep_locked().map(Some)
    }

    /// Write a JSON value, optimizing it first if it is large.
    ///
    /// A cleanup runs first if the write would cross the cleanup threshold,
    /// and once more if the store still rejects it. A second rejection is
    /// `StorageFull`.
    pub fn set_item(&self, key: &str, value: &Value) -> QuotaResult<WriteReport> {
        let serialized =
            serde_json::to_string(value).map_err(|e| QuotaError::Serialization(e.to_string()))?;
        let mut payload = serialized;
        let mut compressed = false;
        if payload.len() as u64 > self.config.compression_threshold {
            if let Some(smaller) = compress::shrink(&payload) {
                payload = smaller;
                compressed = true;
            }
        }

        let _pass = self.serialize_passes();
        let mut cleanup = self.headroom_locked(entry_size(key, &payload))?;
        match self.store.set(key, &payload) {
            Ok(()) => {}
            Err(e) if e.is_capacity_exceeded() => {
                warn!(key, error = %e, "write rejected, cleaning up and retrying once");
                let report = self.sweep_locked()?;
                cleanup.get_or_insert_with(CleanupReport::default).merge(report);
                self.store.set(key, &payload).map_err(|e| match e {
                    StoreError::CapacityExceeded { .. } => QuotaError::StorageFull {
                        attempts: 1,
                        evicted: 0,
                        reason: e.to_string(),
                    },
                    other => other.into(),
                })?;
            }
            Err(e) => return Err(e.into()),
        }

        let tag = keys::compressed_tag_key(key);
        if compressed {
            if let Err(e) = self.store.set(&tag, keys::COMPRESSED_TAG_VALUE) {
                warn!(key, error = %e, "could not write compression tag");
            }
        } else {
            self.store.delete(&tag)?;
        }

        Ok(WriteReport {
            key: key.to_string(),
            bytes: entry_size(key, &payload),
            compressed,
            cleanup,
        })
    }

    /// Read a JSON value written by [`set_item`](Self::set_item).
    pub fn get_item(&self, key: &str) -> QuotaResult<Option<Value>> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| {
                StoreError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
                .into()
            })
    }

    /// Persist `target` under the bounded eviction policy.
    pub fn persist_with_eviction(
        &self,
        target: &mut dyn EvictionTarget,
    ) -> QuotaResult<EvictionReport> {
        eviction::persist_with_eviction(self.store.as_ref(), target, self.config.retry_policy())
    }

    // ----------------------------------------------------------------
    // Stale sweep
    // ----------------------------------------------------------------

    /// Delete transient entries older than the stale age.
    pub fn cleanup_storage(&self) -> QuotaResult<CleanupReport> {
        let _pass = self.serialize_passes();
        self.sweep_locked()
    }

    fn sweep_locked(&self) -> QuotaResult<CleanupReport> {
        let entries = self.store.entries()?;
        let now = self.clock.now_ms();
        let mut report = CleanupReport::default();
        for stale in sweep::find_stale(&entries, now, self.config.stale_age()) {
            if self.store.delete(&stale.key)? {
                report.cleaned_count += 1;
                report.freed_bytes += stale.bytes;
            }
            let tag = keys::compressed_tag_key(&stale.key);
            if let Some(size) = self.store.entry_size(&tag)? {
                self.store.delete(&tag)?;
                report.freed_bytes += size;
            }
        }
        if report.cleaned_count > 0 {
            info!(
                cleaned = report.cleaned_count,
                freed = report.freed_bytes,
                "stale entries swept"
            );
        }
        Ok(report)
    }

    // ----------------------------------------------------------------
    // Compression
    // ----------------------------------------------------------------

    /// Which entries compression would rewrite, and for how much.
    pub fn analyze_compression(&self) -> QuotaResult<CompressionAnalysis> {
        let entries = self.store.entries()?;
        Ok(self.compression_plan(&entries))
    }

    fn compression_plan(&self, entries: &[(String, String)]) -> CompressionAnalysis {
        let total: u64 = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
        let tagged: std::collections::BTreeSet<&str> = entries
            .iter()
            .filter_map(|(k, _)| keys::tag_target(k))
            .collect();
        let mut analysis = CompressionAnalysis::default();
        for (key, value) in entries {
            if keys::is_compressed_tag(key)
                || keys::is_reserved_key(key)
                || tagged.contains(key.as_str())
                || value.len() as u64 <= self.config.compression_threshold
            {
                continue;
            }
            analysis.eligible_bytes += entry_size(key, value);
            if let Some(smaller) = compress::shrink(value) {
                analysis.potential_savings += (value.len() - smaller.len()) as u64;
                analysis.candidates.push(CompressionCandidate {
                    key: key.clone(),
                    original_bytes: value.len() as u64,
                    optimized_bytes: smaller.len() as u64,
                });
            }
        }
        analysis.ratio = ratio(analysis.eligible_bytes, total);
        analysis
    }

    /// Rewrite every candidate in optimized form and tag it.
    pub fn execute_compression(&self) -> QuotaResult<CompressionReport> {
        let _pass = self.serialize_passes();
        let entries = self.store.entries()?;
        let plan = self.compression_plan(&entries);
        let planned: std::collections::HashMap<&str, &str> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let mut report = CompressionReport::default();
        for candidate in plan.candidates {
            let Some(&original) = planned.get(candidate.key.as_str()) else {
                continue;
            };
            let Some(smaller) = compress::shrink(original) else {
                continue;
            };
            if !self.store.compare_and_set(&candidate.key, original, &smaller)? {
                debug!(key = %candidate.key, "entry changed during compression pass, skipped");
                continue;
            }
            let saved = (original.len() - smaller.len()) as u64;
            if let Err(e) = self
                .store
                .set(&keys::compressed_tag_key(&candidate.key), keys::COMPRESSED_TAG_VALUE)
            {
                warn!(key = %candidate.key, error = %e, "could not write compression tag");
            }
            report.compressed_count += 1;
            report.saved_bytes += saved;
        }
        if report.compressed_count > 0 {
            info!(
                count = report.compressed_count,
                saved = report.saved_bytes,
                "entries compressed"
            );
        }
        Ok(report)
    }

    // ----------------------------------------------------------------
    // Deduplication
    // ----------------------------------------------------------------

    /// Groups of byte-identical entries.
    pub fn analyze_duplicates(&self) -> QuotaResult<DedupAnalysis> {
        let entries = self.store.entries()?;
        Ok(dedup_plan(&entries))
    }

    /// Delete every duplicate, keeping the first key of each group.
    pub fn execute_deduplication(&self) -> QuotaResult<DedupReport> {
        let _pass = self.serialize_passes();
        let entries = self.store.entries()?;
        let plan = dedup_plan(&entries);
        let mut report = DedupReport::default();
        for group in plan.groups {
            let Some(kept) = self.store.get(&group.kept)? else {
                continue;
            };
            for key in group.duplicates {
                // Re-check bytes: the kept entry must still match.
                let Some(value) = self.store.get(&key)? else {
                    continue;
                };
                if value != kept {
                    debug!(key = %key, "entry changed during dedup pass, skipped");
                    continue;
                }
                if self.store.delete(&key)? {
                    report.removed_count += 1;
                    report.saved_bytes += entry_size(&key, &value);
                }
                let tag = keys::compressed_tag_key(&key);
                if let Some(size) = self.store.entry_size(&tag)? {
                    self.store.delete(&tag)?;
                    report.saved_bytes += size;
                }
            }
        }
        if report.removed_count > 0 {
            info!(
                removed = report.removed_count,
                saved = report.saved_bytes,
                "duplicate entries removed"
            );
        }
        Ok(report)
    }

    // ----------------------------------------------------------------
    // Whole-store optimization
    // ----------------------------------------------------------------

    /// Dry run of compression, deduplication and the stale sweep.
    pub fn analyze_optimization(&self) -> QuotaResult<OptimizationAnalysis> {
        let entries = self.store.entries()?;
        let status = self.storage_status()?;
        let compression = self.compression_plan(&entries);
        let duplicates = dedup_plan(&entries);
        let stale = sweep::find_stale(&entries, self.clock.now_ms(), self.config.stale_age());
        let stale_bytes: u64 = stale.iter().map(|s| s.bytes).sum();
        let mut analysis = OptimizationAnalysis {
            status,
            total_potential_savings: compression.potential_savings
                + duplicates.duplicate_bytes
                + stale_bytes,
            compression,
            duplicates,
            stale_count: stale.len(),
            stale_bytes,
            recommendations: Vec::new(),
        };
        analysis.recommend();
        Ok(analysis)
    }

    /// Run every pass. A failing pass is recorded and the rest still run.
    pub fn execute_optimization(&self) -> OptimizationReport {
        let mut report = OptimizationReport::default();
        match self.execute_compression() {
            Ok(r) => report.compression = r,
            Err(e) => report.errors.push(format!("compression: {e}")),
        }
        match self.execute_deduplication() {
            Ok(r) => report.deduplication = r,
            Err(e) => report.errors.push(format!("deduplication: {e}")),
        }
        match self.cleanup_storage() {
            Ok(r) => report.cleanup = r,
            Err(e) => report.errors.push(format!("cleanup: {e}")),
        }
        report.saved_bytes = report.compression.saved_bytes
            + report.deduplication.saved_bytes
            + report.cleanup.freed_bytes;
        info!(
            saved = report.saved_bytes,
            errors = report.errors.len(),
            "optimization finished"
        );
        report
    }
}

impl fmt::Debug for QuotaManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaManager")
            .field("max_bytes", &self.max_bytes())
            .field("config", &self.config)
            .finish()
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn key_usage(key: &str, value: &str, total: u64) -> KeyUsage {
    let bytes = entry_size(key, value);
    let (shape, item_count) = ValueShape::inspect(value);
    KeyUsage {
        key: key.to_string(),
        bytes,
        shape,
        item_count,
        percent: ratio(bytes, total) * 100.0,
    }
}

fn dedup_plan(entries: &[(String, String)]) -> DedupAnalysis {
    let total: u64 = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
    let candidates: Vec<(String, String)> = entries
        .iter()
        .filter(|(k, _)| !keys::is_reserved_key(k))
        .cloned()
        .collect();
    let groups = dedup::find_duplicates(&candidates);
    let duplicate_bytes = groups.iter().map(|g| g.duplicate_bytes).sum();
    DedupAnalysis {
        ratio: ratio(duplicate_bytes, total),
        groups,
        duplicate_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use reel_store::MemoryStore;
    use reel_types::ManualClock;
    use serde_json::json;
    use std::time::Duration;

    const T0: u64 = 1_700_000_000_000;
    const HOUR: u64 = 60 * 60 * 1000;

    fn setup(max_bytes: u64) -> (Arc<MemoryStore>, Arc<ManualClock>, QuotaManager) {
        let store = Arc::new(MemoryStore::new(max_bytes));
        let clock = Arc::new(ManualClock::new(T0));
        let config = QuotaConfig {
            max_bytes,
            ..Default::default()
        };
        let manager = QuotaManager::new(store.clone(), clock.clone(), config).unwrap();
        (store, clock, manager)
    }

    /// A JSON object above the compression threshold with droppable fields.
    fn sparse_doc(fields: usize) -> String {
        let mut map = serde_json::Map::new();
        for i in 0..fields {
            map.insert(format!("field_{i:04}"), json!("value-value-value"));
            map.insert(format!("empty_{i:04}"), json!(null));
        }
        serde_json::to_string(&Value::Object(map)).unwrap()
    }

    // ----------------------------------------------------------------
    // Status
    // ----------------------------------------------------------------

    #[test]
    fn status_is_recomputed_every_call() {
        let (store, _clock, m) = setup(1_000);
        assert_eq!(m.storage_status().unwrap().used_bytes, 0);
        store.set("k", &"x".repeat(749)).unwrap();
        let s = m.storage_status().unwrap();
        assert_eq!(s.used_bytes, 750);
        assert_eq!(s.health, crate::Health::Warning);
        store.set("k2", &"x".repeat(150)).unwrap();
        assert_eq!(m.storage_status().unwrap().health, crate::Health::Critical);
    }

    #[test]
    fn stats_list_largest_first() {
        let (store, _clock, m) = setup(100_000);
        for i in 0..12 {
            store.set(&format!("k{i:02}"), &"x".repeat(i * 10)).unwrap();
        }
        let stats = m.storage_stats().unwrap();
        assert_eq!(stats.item_count, 12);
        assert_eq!(stats.largest.len(), 10);
        assert_eq!(stats.largest[0].key, "k11");
    }

    #[test]
    fn key_details_and_delete() {
        let (store, _clock, m) = setup(10_000);
        store.set("characterList", r#"["hero","villain"]"#).unwrap();
        store.set("characterList_compressed", "true").unwrap();
        let d = m.key_details("characterList").unwrap().unwrap();
        assert_eq!(d.usage.shape, ValueShape::Array);
        assert_eq!(d.usage.item_count, 2);
        assert!(d.compressed);
        assert!(!d.transient);
        assert!(m.key_details("missing").unwrap().is_none());

        assert!(m.delete_key("characterList").unwrap());
        assert!(store.is_empty());
        assert!(!m.delete_key("characterList").unwrap());
    }

    // ----------------------------------------------------------------
    // Budgeted writes
    // ----------------------------------------------------------------

    #[test]
    fn cleanup_runs_before_crossing_threshold() {
        let (store, clock, m) = setup(5_000_000);
        let stale_key = format!("temp_{T0}");
        store.set(&stale_key, &"s".repeat(100_000)).unwrap();
        for i in 0..38 {
            store.set(&format!("scene_{i:02}"), &"x".repeat(99_992)).unwrap();
        }
        assert_eq!(store.used_bytes().unwrap(), 3_900_018);
        clock.advance(Duration::from_secs(25 * 3600));

        let value = Value::String("y".repeat(199_990));
        let report = m.set_item("big_entry", &value).unwrap();
        let cleanup = report.cleanup.expect("cleanup must run first");
        assert_eq!(cleanup.cleaned_count, 1);
        assert!(store.get(&stale_key).unwrap().is_none());
        assert!(store.used_bytes().unwrap() <= 5_000_000);
    }

    #[test]
    fn cleanup_runs_even_when_nothing_is_stale() {
        let (store, _clock, m) = setup(5_000_000);
        for i in 0..39 {
            store.set(&format!("scene_{i:02}"), &"x".repeat(99_992)).unwrap();
        }
        let report = m.set_item("big", &Value::String("y".repeat(199_990))).unwrap();
        assert_eq!(report.cleanup, Some(CleanupReport::default()));
        assert!(store.used_bytes().unwrap() <= 5_000_000);
    }

    #[test]
    fn no_cleanup_below_threshold() {
        let (_store, _clock, m) = setup(10_000);
        let report = m.set_item("story", &json!("short")).unwrap();
        assert!(report.cleanup.is_none());
        assert!(!report.compressed);
    }

    #[test]
    fn set_item_fails_with_storage_full() {
        let (store, _clock, m) = setup(100);
        store.set("a", &"x".repeat(90)).unwrap();
        let err = m.set_item("b", &json!("x".repeat(50))).unwrap_err();
        assert!(err.is_storage_full());
        assert!(store.get("b").unwrap().is_none());
        assert!(store.used_bytes().unwrap() <= 100);
    }

    #[test]
    fn set_item_compresses_large_sparse_values() {
        let (store, _clock, m) = setup(1_000_000);
        let doc: Value = serde_json::from_str(&sparse_doc(40)).unwrap();
        let report = m.set_item("generatedTextCards", &doc).unwrap();
        assert!(report.compressed);
        assert_eq!(
            store.get("generatedTextCards_compressed").unwrap().as_deref(),
            Some("true")
        );
        let back = m.get_item("generatedTextCards").unwrap().unwrap();
        assert_eq!(back.as_object().unwrap().len(), 40);

        // Rewriting with a small value clears the tag.
        m.set_item("generatedTextCards", &json!([])).unwrap();
        assert!(store.get("generatedTextCards_compressed").unwrap().is_none());
    }

    #[test]
    fn budget_holds_on_a_store_larger_than_max_bytes() {
        let store = Arc::new(MemoryStore::new(1_000_000));
        let clock = Arc::new(ManualClock::new(T0));
        let config = QuotaConfig {
            max_bytes: 20_000,
            ..Default::default()
        };
        let m = QuotaManager::new(store.clone(), clock, config).unwrap();
        assert_eq!(m.max_bytes(), 20_000);
        assert_eq!(m.store().capacity(), 20_000);

        let mut full = 0;
        for i in 0..40 {
            match m.set_item(&format!("scene_{i:02}"), &json!("x".repeat(1_000))) {
                Ok(_) => {}
                Err(e) => {
                    assert!(e.is_storage_full());
                    full += 1;
                }
            }
            assert!(store.used_bytes().unwrap() <= 20_000);
        }
        assert!(full > 0);
        assert!(m.storage_status().unwrap().ratio <= 1.0);

        let err = m.store().set("direct", &"x".repeat(5_000)).unwrap_err();
        assert!(err.is_capacity_exceeded());
    }

    #[test]
    fn cleanup_trigger_uses_the_effective_ceiling() {
        let (_store, _clock, m) = setup(5_000_000);
        assert_eq!(m.cleanup_trigger_bytes(), 4_000_000);

        let store = Arc::new(MemoryStore::new(1_000));
        let config = QuotaConfig {
            max_bytes: 5_000_000,
            ..Default::default()
        };
        let m = QuotaManager::new(store, Arc::new(ManualClock::new(T0)), config).unwrap();
        assert_eq!(m.max_bytes(), 1_000);
        assert_eq!(m.cleanup_trigger_bytes(), 800);
    }

    #[test]
    fn get_item_reports_corrupt_values() {
        let (store, _clock, m) = setup(1_000);
        store.set("story", "{not json").unwrap();
        let err = m.get_item("story").unwrap_err();
        assert!(matches!(err, QuotaError::Store(StoreError::Corrupt { .. })));
        assert!(m.get_item("missing").unwrap().is_none());
    }

    // ----------------------------------------------------------------
    // Stale sweep
    // ----------------------------------------------------------------

    #[test]
    fn stale_sweep_bound() {
        let (store, clock, m) = setup(10_000);
        let key = format!("temp_{T0}");
        store.set(&key, "draft").unwrap();

        clock.set(T0 + 23 * HOUR);
        assert_eq!(m.cleanup_storage().unwrap().cleaned_count, 0);
        assert!(store.contains(&key).unwrap());

        clock.set(T0 + 25 * HOUR);
        let report = m.cleanup_storage().unwrap();
        assert_eq!(report.cleaned_count, 1);
        assert_eq!(report.freed_bytes, 23);
        assert!(!store.contains(&key).unwrap());
    }

    #[test]
    fn sweep_removes_tag_of_stale_entry() {
        let (store, clock, m) = setup(10_000);
        let key = format!("cache_{T0}");
        store.set(&key, "{}").unwrap();
        store.set(&keys::compressed_tag_key(&key), "true").unwrap();
        store.set("story", "kept").unwrap();
        clock.advance(Duration::from_secs(48 * 3600));
        m.cleanup_storage().unwrap();
        assert_eq!(store.keys().unwrap(), vec!["story"]);
    }

    // ----------------------------------------------------------------
    // Compression
    // ----------------------------------------------------------------

    #[test]
    fn compression_only_rewrites_oversized_sparse_entries() {
        let (store, _clock, m) = setup(1_000_000);
        let sparse = sparse_doc(40);
        store.set("episodeStructureData", &sparse).unwrap();
        store.set("small", r#"{"a":null}"#).unwrap();
        store.set("dense", &serde_json::to_string(&json!({"x": "y".repeat(2000)})).unwrap()).unwrap();

        let analysis = m.analyze_compression().unwrap();
        assert_eq!(analysis.candidates.len(), 1);
        assert_eq!(analysis.candidates[0].key, "episodeStructureData");
        assert!(analysis.potential_savings > 0);

        let report = m.execute_compression().unwrap();
        assert_eq!(report.compressed_count, 1);
        assert_eq!(report.saved_bytes, analysis.potential_savings);
        let now = store.get("episodeStructureData").unwrap().unwrap();
        assert!(now.len() < sparse.len());
        assert!(store.contains("episodeStructureData_compressed").unwrap());
        assert!(!store.contains("small_compressed").unwrap());
        assert!(!store.contains("dense_compressed").unwrap());
    }

    #[test]
    fn compression_and_dedup_skip_service_records() {
        let (store, _clock, m) = setup(1_000_000);
        let record = sparse_doc(40);
        store.set("reel:project:p1:artifacts", &record).unwrap();
        store.set("reel:project:p2:artifacts", &record).unwrap();

        assert!(m.analyze_compression().unwrap().candidates.is_empty());
        assert!(m.analyze_duplicates().unwrap().groups.is_empty());
        let report = m.execute_optimization();
        assert_eq!(report.compression.compressed_count, 0);
        assert_eq!(report.deduplication.removed_count, 0);
        assert_eq!(
            store.get("reel:project:p1:artifacts").unwrap().as_deref(),
            Some(record.as_str())
        );
        assert!(store.contains("reel:project:p2:artifacts").unwrap());
        assert!(!store.contains("reel:project:p1:artifacts_compressed").unwrap());
    }

    /// Rewrites one entry right after handing out a snapshot of all entries.
    struct RewriteAfterScan {
        inner: MemoryStore,
        rewrite: std::sync::Mutex<Option<(String, String)>>,
    }

    impl KeyValueStore for RewriteAfterScan {
        fn get(&self, key: &str) -> reel_store::StoreResult<Option<String>> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str) -> reel_store::StoreResult<()> {
            self.inner.set(key, value)
        }
        fn compare_and_set(&self, key: &str, expected: &str, value: &str) -> reel_store::StoreResult<bool> {
            self.inner.compare_and_set(key, expected, value)
        }
        fn delete(&self, key: &str) -> reel_store::StoreResult<bool> {
            self.inner.delete(key)
        }
        fn keys(&self) -> reel_store::StoreResult<Vec<String>> {
            self.inner.keys()
        }
        fn capacity(&self) -> u64 {
            self.inner.capacity()
        }
        fn used_bytes(&self) -> reel_store::StoreResult<u64> {
            self.inner.used_bytes()
        }
        fn entries(&self) -> reel_store::StoreResult<Vec<(String, String)>> {
            let snapshot = self.inner.entries()?;
            if let Some((key, value)) = self.rewrite.lock().unwrap().take() {
                self.inner.set(&key, &value)?;
            }
            Ok(snapshot)
        }
    }

    #[test]
    fn compression_never_overwrites_a_concurrent_rewrite() {
        let original = sparse_doc(40);
        // Same length, different content.
        let rewritten = original.replace("value-value-value", "VALUE-VALUE-VALUE");
        assert_eq!(original.len(), rewritten.len());

        let store = Arc::new(RewriteAfterScan {
            inner: MemoryStore::new(1_000_000),
            rewrite: std::sync::Mutex::new(Some(("episodeStructureData".into(), rewritten.clone()))),
        });
        store.inner.set("episodeStructureData", &original).unwrap();
        let config = QuotaConfig {
            max_bytes: 1_000_000,
            ..Default::default()
        };
        let m = QuotaManager::new(store.clone(), Arc::new(ManualClock::new(T0)), config).unwrap();

        let report = m.execute_compression().unwrap();
        assert_eq!(report.compressed_count, 0);
        assert_eq!(
            store.get("episodeStructureData").unwrap().as_deref(),
            Some(rewritten.as_str())
        );
        assert!(!store.contains("episodeStructureData_compressed").unwrap());
    }

    #[test]
    fn compression_is_idempotent() {
        let (store, _clock, m) = setup(1_000_000);
        store.set("episodeStructureData", &sparse_doc(40)).unwrap();
        m.execute_compression().unwrap();
        let keys_after_first = store.keys().unwrap();
        let used_after_first = store.used_bytes().unwrap();

        let second = m.execute_compression().unwrap();
        assert_eq!(second, CompressionReport::default());
        assert_eq!(store.keys().unwrap(), keys_after_first);
        assert_eq!(store.used_bytes().unwrap(), used_after_first);
        assert!(m.analyze_compression().unwrap().candidates.is_empty());
    }

    // ----------------------------------------------------------------
    // Deduplication
    // ----------------------------------------------------------------

    #[test]
    fn dedup_keeps_first_and_frees_bytes() {
        let (store, _clock, m) = setup(10_000);
        store.set("a", "same-content").unwrap();
        store.set("b", "same-content").unwrap();
        store.set("b_compressed", "true").unwrap();
        store.set("c", "other").unwrap();

        let analysis = m.analyze_duplicates().unwrap();
        assert_eq!(analysis.groups.len(), 1);
        assert_eq!(analysis.duplicate_bytes, 13);

        let report = m.execute_deduplication().unwrap();
        assert_eq!(report.removed_count, 1);
        assert_eq!(report.saved_bytes, 13 + 16);
        assert_eq!(store.keys().unwrap(), vec!["a", "c"]);
    }

    proptest! {
        #[test]
        fn dedup_never_empties_a_group_or_merges_distinct_bytes(
            values in proptest::collection::vec(0u8..4, 1..24)
        ) {
            let (store, _clock, m) = setup(1_000_000);
            for (i, v) in values.iter().enumerate() {
                store.set(&format!("k{i:03}"), &format!("payload-{v}")).unwrap();
            }
            let before: std::collections::BTreeSet<String> =
                store.entries().unwrap().into_iter().map(|(_, v)| v).collect();
            m.execute_deduplication().unwrap();
            let after: Vec<String> =
                store.entries().unwrap().into_iter().map(|(_, v)| v).collect();
            let after_set: std::collections::BTreeSet<String> = after.iter().cloned().collect();
            // Every distinct value survives exactly once.
            prop_assert_eq!(&before, &after_set);
            prop_assert_eq!(after.len(), after_set.len());
        }
    }

    // ----------------------------------------------------------------
    // Whole-store optimization
    // ----------------------------------------------------------------

    #[test]
    fn analyze_then_execute_optimization() {
        let (store, clock, m) = setup(1_000_000);
        store.set("episodeStructureData", &sparse_doc(40)).unwrap();
        store.set("copy_a", "duplicate").unwrap();
        store.set("copy_b", "duplicate").unwrap();
        store.set(&format!("temp_{T0}"), "draft").unwrap();
        clock.advance(Duration::from_secs(30 * 3600));

        let analysis = m.analyze_optimization().unwrap();
        assert_eq!(analysis.compression.candidates.len(), 1);
        assert_eq!(analysis.duplicates.groups.len(), 1);
        assert_eq!(analysis.stale_count, 1);
        assert!(analysis.total_potential_savings > 0);
        assert!(crate::render_report(&analysis).contains("Total potential savings"));

        let used_before = store.used_bytes().unwrap();
        let report = m.execute_optimization();
        assert!(report.is_clean());
        assert_eq!(report.compression.compressed_count, 1);
        assert_eq!(report.deduplication.removed_count, 1);
        assert_eq!(report.cleanup.cleaned_count, 1);
        assert!(store.used_bytes().unwrap() < used_before);
    }

    #[test]
    fn rejects_invalid_config() {
        let store = Arc::new(MemoryStore::new(100));
        let clock = Arc::new(ManualClock::new(0));
        let config = QuotaConfig {
            max_bytes: 0,
            ..Default::default()
        };
        assert!(QuotaManager::new(store, clock, config).is_err());
    }
}
