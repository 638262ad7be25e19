use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use reel_quota::{EvictionReport, QuotaError, QuotaManager, Severity, StorageRecommendation};
use reel_store::{BlobReferenceFactory, StoreError};
use reel_types::{ArtifactId, ArtifactKind, MonotonicClock, ProjectId};

use crate::artifact::{
    project_of_record_key, sniff_mime, Artifact, Metadata, Payload, ProjectArtifactSet,
};
use crate::config::TierConfig;
use crate::error::{ArtifactError, ArtifactResult};
use crate::tier::{Flush, RebalanceReport, TierState};

/// What a [`ArtifactStore::store_image`] call did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReceipt {
    pub artifact_id: ArtifactId,
    /// Whether the new artifact kept its bytes in the primary store.
    pub materialized: bool,
    /// Artifacts demoted by the project cap and the rebalance.
    pub demoted: usize,
    /// Artifacts demoted by the eviction protocol.
    pub evicted: usize,
    /// Projects deleted for falling beyond the retention bound.
    pub deleted_projects: Vec<ProjectId>,
}

/// Aggregate counts over every project.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStats {
    pub projects: usize,
    pub artifacts: usize,
    pub materialized: usize,
    pub referenced: usize,
    /// Raw payload bytes of materialized artifacts.
    pub materialized_bytes: u64,
    /// The current top-K projects, most recent first.
    pub hot_projects: Vec<ProjectId>,
}

/// Per-project artifact collections with a recency-based tier policy.
///
/// The `K` most recently accessed projects keep new payloads materialized
/// in the primary store; every other project holds only reference handles.
/// All state sits behind one lock, and rebalance, quota checks, eviction and
/// the guarded write all run while it is held.
pub struct ArtifactStore {
    quota: Arc<QuotaManager>,
    blobs: Arc<dyn BlobReferenceFactory>,
    clock: Arc<MonotonicClock>,
    config: TierConfig,
    state: Mutex<TierState>,
}

impl ArtifactStore {
    /// Load every persisted project record from the quota manager's store.
    ///
    /// Handles minted by a previous process no longer resolve; those
    /// artifacts keep their records but [`load_payload`](Self::load_payload)
    /// returns `None` for them.
    pub fn open(
        quota: Arc<QuotaManager>,
        blobs: Arc<dyn BlobReferenceFactory>,
        clock: Arc<MonotonicClock>,
        config: TierConfig,
    ) -> ArtifactResult<Self> {
        config.validate()?;
        let mut state = TierState::default();
        let store = quota.store();
        for key in store.keys()? {
            if project_of_record_key(&key).is_none() {
                continue;
            }
            let Some(raw) = store.get(&key)? else {
                continue;
            };
            let set: ProjectArtifactSet =
                serde_json::from_str(&raw).map_err(|e| ArtifactError::Corrupt {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
            clock.observe(set.last_accessed_at);
            for a in &set.artifacts {
                clock.observe(a.created_at);
            }
            state.adopt(set);
        }
        info!(projects = state.projects.len(), artifacts = state.index.len(), "artifact store opened");

        let this = Self {
            quota,
            blobs,
            clock,
            config,
            state: Mutex::new(state),
        };
        {
            let mut state = this.lock()?;
            state.rebalance(&this.config, this.blobs.as_ref());
            this.persist(&mut state)?;
        }
        Ok(this)
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    fn lock(&self) -> ArtifactResult<MutexGuard<'_, TierState>> {
        self.state
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()).into())
    }

    /// Flush pending changes under the quota budget.
    fn persist(&self, state: &mut TierState) -> ArtifactResult<EvictionReport> {
        let store = self.quota.store();
        let growth = state.pending_growth(store.as_ref())?;
        if growth > 0 {
            self.quota.ensure_headroom(growth)?;
        }
        let mut target = Flush {
            state,
            blobs: self.blobs.as_ref(),
        };
        Ok(self.quota.persist_with_eviction(&mut target)?)
    }

    // ----------------------------------------------------------------
    // Insert
    // ----------------------------------------------------------------

    /// Record a new artifact for `project`.
    ///
    /// Hot projects keep the bytes; cold projects get a reference handle
    /// straight away. On `StorageFull` the artifact still exists in memory
    /// and its id is carried in the error.
    pub fn store_image(
        &self,
        project: &ProjectId,
        kind: ArtifactKind,
        payload: Vec<u8>,
        metadata: Metadata,
    ) -> ArtifactResult<StoreReceipt> {
        let mut state = self.lock()?;
        let blobs = self.blobs.as_ref();

        let mut demoted =
            state.enforce_project_cap(project, self.config.max_artifacts_per_project, blobs);

        let now = self.clock.tick();
        state.touch(project, now);
        let materialize = state.is_hot(project, self.config.materialized_projects);

        let mime = sniff_mime(&payload).to_string();
        let payload = if materialize {
            Payload::Materialized(payload)
        } else {
            Payload::Referenced(blobs.create(&payload, &mime))
        };
        let artifact = Artifact {
            id: ArtifactId::new(),
            project_id: project.clone(),
            kind,
            mime,
            payload,
            created_at: now,
            metadata,
        };
        let artifact_id = artifact.id;
        state.insert(artifact);
        debug!(project = %project, artifact = %artifact_id, kind = %kind, materialize, "artifact recorded");

        let rebalance = state.rebalance(&self.config, blobs);
        demoted += rebalance.demoted;

        let eviction = self.persist(&mut state).map_err(|e| match e {
            ArtifactError::Quota(source @ QuotaError::StorageFull { .. }) => {
                warn!(project = %project, artifact = %artifact_id, error = %source, "artifact kept in memory only");
                ArtifactError::StorageFull {
                    artifact_id,
                    source,
                }
            }
            other => other,
        })?;

        let materialized = state
            .find(&artifact_id)
            .map(Artifact::is_materialized)
            .unwrap_or(false);
        Ok(StoreReceipt {
            artifact_id,
            materialized,
            demoted,
            evicted: eviction.evicted,
            deleted_projects: rebalance.deleted_projects,
        })
    }

    // ----------------------------------------------------------------
    // Reads
    // ----------------------------------------------------------------

    /// Fetch an artifact. Counts as an access of its project, which may
    /// promote the project into the hot tier.
    pub fn get_artifact(&self, id: &ArtifactId) -> ArtifactResult<Option<Artifact>> {
        let mut state = self.lock()?;
        let Some(project) = state.index.get(id).cloned() else {
            return Ok(None);
        };
        let now = self.clock.tick();
        state.touch(&project, now);
        state.rebalance(&self.config, self.blobs.as_ref());
        self.persist(&mut state)?;
        Ok(state.find(id).cloned())
    }

    /// Every artifact of `project`, oldest first. Counts as an access.
    pub fn project_artifacts(&self, project: &ProjectId) -> ArtifactResult<Vec<Artifact>> {
        let mut state = self.lock()?;
        if !state.projects.contains_key(project) {
            return Ok(Vec::new());
        }
        let now = self.clock.tick();
        state.touch(project, now);
        state.rebalance(&self.config, self.blobs.as_ref());
        self.persist(&mut state)?;
        let mut artifacts = state
            .projects
            .get(project)
            .map(|s| s.artifacts.clone())
            .unwrap_or_default();
        artifacts.sort_by_key(|a| a.created_at);
        Ok(artifacts)
    }

    /// The artifact's bytes: materialized data, or the data behind its
    /// reference handle while that handle is live. Does not count as an
    /// access.
    pub fn load_payload(&self, id: &ArtifactId) -> ArtifactResult<Option<Vec<u8>>> {
        let state = self.lock()?;
        let Some(artifact) = state.find(id) else {
            return Ok(None);
        };
        Ok(match &artifact.payload {
            Payload::Materialized(bytes) => Some(bytes.clone()),
            Payload::Referenced(handle) => self.blobs.resolve(handle),
        })
    }

    // ----------------------------------------------------------------
    // Deletes
    // ----------------------------------------------------------------

    /// Remove one artifact. Deleting the last artifact of a project deletes
    /// the project.
    pub fn delete_artifact(&self, id: &ArtifactId) -> ArtifactResult<bool> {
        let mut state = self.lock()?;
        let Some(artifact) = state.remove_artifact(id, self.blobs.as_ref()) else {
            return Ok(false);
        };
        info!(project = %artifact.project_id, artifact = %id, "artifact deleted");
        self.persist(&mut state)?;
        Ok(true)
    }

    /// Remove a whole project and release all of its handles.
    pub fn delete_project(&self, project: &ProjectId) -> ArtifactResult<bool> {
        let mut state = self.lock()?;
        let Some(set) = state.remove_project(project, self.blobs.as_ref()) else {
            return Ok(false);
        };
        info!(project = %project, artifacts = set.artifacts.len(), "project deleted");
        self.persist(&mut state)?;
        Ok(true)
    }

    // ----------------------------------------------------------------
    // Maintenance and reporting
    // ----------------------------------------------------------------

    /// Apply the tier policy now and persist the result.
    pub fn rebalance(&self) -> ArtifactResult<RebalanceReport> {
        let mut state = self.lock()?;
        let report = state.rebalance(&self.config, self.blobs.as_ref());
        self.persist(&mut state)?;
        Ok(report)
    }

    /// Release every live reference handle. The artifacts stay, with
    /// handles that no longer resolve.
    pub fn release_references(&self) -> ArtifactResult<usize> {
        let state = self.lock()?;
        let released = state.release_references(self.blobs.as_ref());
        if released > 0 {
            info!(released, "reference handles released");
        }
        Ok(released)
    }

    pub fn stats(&self) -> ArtifactResult<ArtifactStats> {
        let state = self.lock()?;
        let mut stats = ArtifactStats {
            projects: state.projects.len(),
            hot_projects: state
                .ranked()
                .into_iter()
                .take(self.config.materialized_projects)
                .collect(),
            ..Default::default()
        };
        for a in state.projects.values().flat_map(|s| s.artifacts.iter()) {
            stats.artifacts += 1;
            if a.is_materialized() {
                stats.materialized += 1;
                stats.materialized_bytes += a.materialized_len();
            } else {
                stats.referenced += 1;
            }
        }
        Ok(stats)
    }

    /// Advice shown when more projects are stored than stay hot.
    pub fn recommendation(&self) -> ArtifactResult<Option<StorageRecommendation>> {
        let stats = self.stats()?;
        if stats.projects <= self.config.materialized_projects {
            return Ok(None);
        }
        Ok(Some(StorageRecommendation::new(
            Severity::Info,
            format!(
                "{} projects hold {} artifacts; only the {} most recent keep their payloads in \
                 storage, older ones are kept as references. Saving projects externally is recommended.",
                stats.projects, stats.artifacts, self.config.materialized_projects
            ),
        )))
    }
}

impl fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ArtifactStore");
        d.field("config", &self.config);
        if let Ok(state) = self.state.try_lock() {
            d.field("projects", &state.projects.len())
                .field("artifacts", &state.index.len());
        }
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::record_key;
    use proptest::prelude::*;
    use reel_quota::QuotaConfig;
    use reel_store::{BlobRegistry, KeyValueStore, MemoryStore};
    use reel_types::ManualClock;

    const T0: u64 = 1_700_000_000_000;

    struct Harness {
        store: Arc<MemoryStore>,
        blobs: Arc<BlobRegistry>,
        wall: Arc<ManualClock>,
        quota: Arc<QuotaManager>,
        artifacts: ArtifactStore,
    }

    fn harness(capacity: u64, config: TierConfig) -> Harness {
        harness_with_budget(capacity, capacity, config)
    }

    /// A backend of `capacity` bytes managed under a `max_bytes` budget.
    fn harness_with_budget(capacity: u64, max_bytes: u64, config: TierConfig) -> Harness {
        let store = Arc::new(MemoryStore::new(capacity));
        let blobs = Arc::new(BlobRegistry::new());
        let wall = Arc::new(ManualClock::new(T0));
        let quota = Arc::new(
            QuotaManager::new(
                store.clone(),
                wall.clone(),
                QuotaConfig {
                    max_bytes,
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        let clock = Arc::new(MonotonicClock::new(wall.clone()));
        let artifacts = ArtifactStore::open(quota.clone(), blobs.clone(), clock, config).unwrap();
        Harness {
            store,
            blobs,
            wall,
            quota,
            artifacts,
        }
    }

    fn reopen(h: &Harness) -> ArtifactResult<ArtifactStore> {
        let clock = Arc::new(MonotonicClock::new(h.wall.clone()));
        ArtifactStore::open(
            h.quota.clone(),
            h.blobs.clone(),
            clock,
            h.artifacts.config().clone(),
        )
    }

    fn pid(s: &str) -> ProjectId {
        ProjectId::new(s).unwrap()
    }

    fn png(n: usize) -> Vec<u8> {
        let mut v = b"\x89PNG\r\n\x1a\n".to_vec();
        v.resize(n.max(8), 0xAB);
        v
    }

    fn put(h: &Harness, project: &str) -> StoreReceipt {
        h.artifacts
            .store_image(&pid(project), ArtifactKind::Character, png(64), Metadata::new())
            .unwrap()
    }

    fn fully_materialized(h: &Harness) -> Vec<ProjectId> {
        let state = h.artifacts.lock().unwrap();
        state
            .projects
            .values()
            .filter(|s| !s.artifacts.is_empty() && s.fully_materialized())
            .map(|s| s.project_id.clone())
            .collect()
    }

    // ----------------------------------------------------------------
    // Insert and read
    // ----------------------------------------------------------------

    #[test]
    fn store_and_get() {
        let h = harness(1_000_000, TierConfig::default());
        let mut meta = Metadata::new();
        meta.insert("prompt".into(), serde_json::json!("a knight at dawn"));
        let receipt = h
            .artifacts
            .store_image(&pid("p1"), ArtifactKind::Character, png(32), meta)
            .unwrap();
        assert!(receipt.materialized);
        assert_eq!(receipt.demoted, 0);

        let a = h.artifacts.get_artifact(&receipt.artifact_id).unwrap().unwrap();
        assert_eq!(a.mime, "image/png");
        assert_eq!(a.metadata["prompt"], "a knight at dawn");
        assert_eq!(
            h.artifacts.load_payload(&receipt.artifact_id).unwrap().unwrap(),
            png(32)
        );
        assert!(h.artifacts.get_artifact(&ArtifactId::new()).unwrap().is_none());
        assert_eq!(h.store.len(), 1);
    }

    #[test]
    fn created_at_is_strictly_increasing_within_a_millisecond() {
        let h = harness(1_000_000, TierConfig::default());
        let a = put(&h, "p1");
        let b = put(&h, "p1");
        let list = h.artifacts.project_artifacts(&pid("p1")).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, a.artifact_id);
        assert_eq!(list[1].id, b.artifact_id);
        assert!(list[0].created_at < list[1].created_at);
    }

    // ----------------------------------------------------------------
    // Tier policy
    // ----------------------------------------------------------------

    #[test]
    fn fourth_project_demotes_the_coldest() {
        let h = harness(1_000_000, TierConfig::default());
        let a = put(&h, "A");
        put(&h, "B");
        put(&h, "C");
        let d = put(&h, "D");
        assert_eq!(d.demoted, 1);
        assert!(d.materialized);

        let mut hot = fully_materialized(&h);
        hot.sort();
        assert_eq!(hot, vec![pid("B"), pid("C"), pid("D")]);
        assert_eq!(h.blobs.live_count(), 1);

        // Reading A promotes it and pushes B out; A's old artifact stays
        // referenced.
        let got = h.artifacts.get_artifact(&a.artifact_id).unwrap().unwrap();
        assert!(!got.is_materialized());
        let stats = h.artifacts.stats().unwrap();
        assert_eq!(stats.hot_projects, vec![pid("A"), pid("D"), pid("C")]);
        let mut hot = fully_materialized(&h);
        hot.sort();
        assert_eq!(hot, vec![pid("C"), pid("D")]);

        // A new artifact for A is materialized going forward.
        let next = put(&h, "A");
        assert!(next.materialized);
        assert_eq!(
            h.artifacts.load_payload(&a.artifact_id).unwrap().unwrap(),
            png(64)
        );
    }

    #[test]
    fn per_project_cap_demotes_oldest_half() {
        let h = harness(50_000_000, TierConfig::default());
        let ids: Vec<ArtifactId> = (0..50).map(|_| put(&h, "p1").artifact_id).collect();
        let receipt = put(&h, "p1");
        assert_eq!(receipt.demoted, 25);
        assert!(receipt.materialized);

        let list = h.artifacts.project_artifacts(&pid("p1")).unwrap();
        assert_eq!(list.len(), 51);
        for (i, a) in list.iter().enumerate() {
            assert_eq!(a.is_materialized(), i >= 25, "artifact {i}");
        }
        assert_eq!(list[0].id, ids[0]);
    }

    #[test]
    fn projects_beyond_twice_k_are_deleted() {
        let config = TierConfig {
            materialized_projects: 1,
            ..Default::default()
        };
        let h = harness(1_000_000, config);
        let first = put(&h, "p1");
        put(&h, "p2");
        h.wall.advance(std::time::Duration::from_millis(5));
        let third = put(&h, "p3");
        assert_eq!(third.deleted_projects, vec![pid("p1")]);
        assert!(h.artifacts.get_artifact(&first.artifact_id).unwrap().is_none());
        assert_eq!(h.artifacts.stats().unwrap().projects, 2);
        // p2's handle is live, p1's was released with the project.
        assert_eq!(h.blobs.live_count(), 1);
        assert_eq!(h.store.len(), 2);
    }

    #[test]
    fn written_project_is_always_hot() {
        let config = TierConfig {
            materialized_projects: 1,
            ..Default::default()
        };
        let h = harness(1_000_000, config);
        let first = put(&h, "first");
        let second = put(&h, "second");
        assert!(second.materialized);
        assert_eq!(second.demoted, 1);
        assert_eq!(h.artifacts.stats().unwrap().hot_projects, vec![pid("second")]);
        let a = h.artifacts.load_payload(&first.artifact_id).unwrap();
        assert_eq!(a, Some(png(64)));
    }

    // ----------------------------------------------------------------
    // Deletes
    // ----------------------------------------------------------------

    #[test]
    fn delete_last_artifact_deletes_project() {
        let h = harness(1_000_000, TierConfig::default());
        let a = put(&h, "p1");
        assert!(h.artifacts.delete_artifact(&a.artifact_id).unwrap());
        assert!(!h.artifacts.delete_artifact(&a.artifact_id).unwrap());
        assert_eq!(h.artifacts.stats().unwrap().projects, 0);
        assert!(h.store.is_empty());
    }

    #[test]
    fn delete_referenced_artifact_releases_handle() {
        let h = harness(1_000_000, TierConfig::default());
        let a = put(&h, "A");
        for p in ["B", "C", "D"] {
            put(&h, p);
        }
        assert_eq!(h.blobs.live_count(), 1);
        h.artifacts.delete_artifact(&a.artifact_id).unwrap();
        assert_eq!(h.blobs.live_count(), 0);
    }

    #[test]
    fn delete_project_releases_everything() {
        let h = harness(1_000_000, TierConfig::default());
        put(&h, "A");
        put(&h, "A");
        for p in ["B", "C", "D"] {
            put(&h, p);
        }
        assert_eq!(h.blobs.live_count(), 2);
        assert!(h.artifacts.delete_project(&pid("A")).unwrap());
        assert!(!h.artifacts.delete_project(&pid("A")).unwrap());
        assert_eq!(h.blobs.live_count(), 0);
        assert_eq!(h.store.len(), 3);
    }

    // ----------------------------------------------------------------
    // Quota interaction
    // ----------------------------------------------------------------

    #[test]
    fn eviction_makes_room_for_new_artifacts() {
        let h = harness(20_000, TierConfig::default());
        let mut evicted = 0;
        for _ in 0..20 {
            let r = h
                .artifacts
                .store_image(&pid("p1"), ArtifactKind::SettingCut, png(1_000), Metadata::new())
                .unwrap();
            evicted += r.evicted;
            assert!(h.store.used_bytes().unwrap() <= 20_000);
        }
        assert!(evicted >= 10);
        let stats = h.artifacts.stats().unwrap();
        assert_eq!(stats.artifacts, 20);
        assert!(stats.referenced >= 10);
    }

    #[test]
    fn storage_full_keeps_artifact_in_memory() {
        let h = harness(100, TierConfig::default());
        let err = h
            .artifacts
            .store_image(&pid("p1"), ArtifactKind::Background, png(1_000), Metadata::new())
            .unwrap_err();
        assert!(err.is_storage_full());
        let ArtifactError::StorageFull { artifact_id, .. } = err else {
            panic!("expected StorageFull");
        };
        assert!(h.store.is_empty());
        let stats = h.artifacts.stats().unwrap();
        assert_eq!(stats.artifacts, 1);
        // Demoted by the failed eviction round, and still resolvable.
        assert_eq!(stats.referenced, 1);
        assert_eq!(h.artifacts.load_payload(&artifact_id).unwrap().unwrap(), png(1_000));
    }

    // ----------------------------------------------------------------
    // Reload and reporting
    // ----------------------------------------------------------------

    #[test]
    fn reopen_restores_projects() {
        let h = harness(1_000_000, TierConfig::default());
        let a = put(&h, "p1");
        put(&h, "p2");

        let quota = Arc::new(
            QuotaManager::new(h.store.clone(), h.wall.clone(), QuotaConfig::default()).unwrap(),
        );
        let clock = Arc::new(MonotonicClock::new(h.wall.clone()));
        let reopened =
            ArtifactStore::open(quota, h.blobs.clone(), clock, TierConfig::default()).unwrap();
        let stats = reopened.stats().unwrap();
        assert_eq!(stats.projects, 2);
        assert_eq!(stats.artifacts, 2);

        // New stamps sort after reloaded ones even on a frozen wall clock.
        let b = reopened
            .store_image(&pid("p1"), ArtifactKind::Character, png(8), Metadata::new())
            .unwrap();
        let list = reopened.project_artifacts(&pid("p1")).unwrap();
        assert_eq!(list[0].id, a.artifact_id);
        assert_eq!(list[1].id, b.artifact_id);
    }

    #[test]
    fn reopen_rejects_corrupt_records() {
        let h = harness(1_000_000, TierConfig::default());
        h.store.set("reel:project:p1:artifacts", "{oops").unwrap();
        let quota = Arc::new(
            QuotaManager::new(h.store.clone(), h.wall.clone(), QuotaConfig::default()).unwrap(),
        );
        let clock = Arc::new(MonotonicClock::new(h.wall.clone()));
        let err = ArtifactStore::open(quota, h.blobs.clone(), clock, TierConfig::default())
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Corrupt { .. }));
    }

    #[test]
    fn release_references_and_recommendation() {
        let h = harness(1_000_000, TierConfig::default());
        assert!(h.artifacts.recommendation().unwrap().is_none());
        let a = put(&h, "A");
        for p in ["B", "C", "D"] {
            put(&h, p);
        }
        let rec = h.artifacts.recommendation().unwrap().unwrap();
        assert!(rec.message.starts_with("4 projects hold 4 artifacts"));

        assert_eq!(h.artifacts.release_references().unwrap(), 1);
        assert_eq!(h.blobs.live_count(), 0);
        assert!(h.artifacts.load_payload(&a.artifact_id).unwrap().is_none());
        assert_eq!(h.artifacts.stats().unwrap().artifacts, 4);
    }

    // ----------------------------------------------------------------
    // Properties
    // ----------------------------------------------------------------

    // ----------------------------------------------------------------
    // Budget and maintenance passes
    // ----------------------------------------------------------------

    #[test]
    fn budget_is_enforced_on_an_oversized_backend() {
        let h = harness_with_budget(1_000_000, 20_000, TierConfig::default());
        let mut evicted = 0;
        for _ in 0..40 {
            match h
                .artifacts
                .store_image(&pid("p1"), ArtifactKind::Character, png(1_000), Metadata::new())
            {
                Ok(r) => evicted += r.evicted,
                Err(e) => assert!(e.is_storage_full()),
            }
            assert!(h.store.used_bytes().unwrap() <= 20_000);
        }
        assert!(evicted > 0);
        let status = h.quota.storage_status().unwrap();
        assert_eq!(status.max_bytes, 20_000);
        assert!(status.ratio <= 1.0);
    }

    #[test]
    fn records_survive_optimization_and_reopen() {
        let h = harness(1_000_000, TierConfig::default());
        for _ in 0..10 {
            h.artifacts
                .store_image(&pid("p1"), ArtifactKind::Character, Vec::new(), Metadata::new())
                .unwrap();
        }
        let key = record_key(&pid("p1"));
        let before = h.store.get(&key).unwrap();

        let report = h.quota.execute_optimization();
        assert!(report.is_clean());
        assert_eq!(h.store.get(&key).unwrap(), before);
        assert!(!h.store.contains(&reel_store::keys::compressed_tag_key(&key)).unwrap());

        let reopened = reopen(&h).unwrap();
        assert_eq!(reopened.project_artifacts(&pid("p1")).unwrap().len(), 10);
    }

    #[test]
    fn deleting_a_project_leaves_no_tag_behind() {
        let h = harness(1_000_000, TierConfig::default());
        put(&h, "p1");
        let tag = reel_store::keys::compressed_tag_key(&record_key(&pid("p1")));
        h.store.set(&tag, reel_store::keys::COMPRESSED_TAG_VALUE).unwrap();
        assert!(h.artifacts.delete_project(&pid("p1")).unwrap());
        assert!(h.store.is_empty());
    }

    // ----------------------------------------------------------------
    // Concurrent access
    // ----------------------------------------------------------------

    #[test]
    fn concurrent_writers_and_readers_keep_every_artifact() {
        let h = harness(10_000_000, TierConfig::default());
        std::thread::scope(|s| {
            for t in 0..4 {
                let h = &h;
                s.spawn(move || {
                    let own = format!("own{t}");
                    for _ in 0..10 {
                        let shared = put(h, "shared");
                        let mine = put(h, &own);
                        assert!(h.artifacts.get_artifact(&shared.artifact_id).unwrap().is_some());
                        assert!(h.artifacts.get_artifact(&mine.artifact_id).unwrap().is_some());
                    }
                });
            }
        });

        let stats = h.artifacts.stats().unwrap();
        assert_eq!(stats.projects, 5);
        assert_eq!(stats.artifacts, 80);
        assert_eq!(h.artifacts.project_artifacts(&pid("shared")).unwrap().len(), 40);

        let full = fully_materialized(&h);
        assert!(full.len() <= 3);
        for p in &full {
            assert!(stats.hot_projects.contains(p));
        }
        assert!(h.store.used_bytes().unwrap() <= 10_000_000);

        let reopened = reopen(&h).unwrap();
        assert_eq!(reopened.stats().unwrap().artifacts, 80);
    }

    #[test]
    fn concurrent_writers_respect_the_budget() {
        let h = harness_with_budget(1_000_000, 30_000, TierConfig::default());
        std::thread::scope(|s| {
            for t in 0..4 {
                let h = &h;
                s.spawn(move || {
                    for i in 0..15 {
                        let project = pid(&format!("p{}", (t + i) % 3));
                        match h.artifacts.store_image(
                            &project,
                            ArtifactKind::Background,
                            png(1_000),
                            Metadata::new(),
                        ) {
                            Ok(_) => {}
                            Err(e) => assert!(e.is_storage_full()),
                        }
                        assert!(h.store.used_bytes().unwrap() <= 30_000);
                    }
                });
            }
        });
        assert!(h.store.used_bytes().unwrap() <= 30_000);
        assert!(fully_materialized(&h).len() <= 3);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Store(usize),
        Read(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0usize..7).prop_map(Op::Store),
            1 => (0usize..7).prop_map(Op::Read),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn hot_tier_matches_most_recent_projects(ops in proptest::collection::vec(op(), 1..40)) {
            let h = harness(10_000_000, TierConfig::default());
            let mut ids: Vec<Vec<ArtifactId>> = vec![Vec::new(); 7];
            for op in ops {
                match op {
                    Op::Store(p) => {
                        let r = put(&h, &format!("p{p}"));
                        ids[p].push(r.artifact_id);
                    }
                    Op::Read(p) => {
                        if let Some(id) = ids[p].first() {
                            h.artifacts.get_artifact(id).unwrap();
                        }
                    }
                }
                let hot = h.artifacts.stats().unwrap().hot_projects;
                let full = fully_materialized(&h);
                prop_assert!(full.len() <= 3);
                for p in &full {
                    prop_assert!(hot.contains(p));
                }
                let state = h.artifacts.lock().unwrap();
                prop_assert!(state.projects.len() <= 6);
                for set in state.projects.values() {
                    if !hot.contains(&set.project_id) {
                        prop_assert_eq!(set.materialized_count(), 0);
                    }
                }
            }
        }

        #[test]
        fn usage_never_exceeds_capacity(sizes in proptest::collection::vec(16usize..3_000, 1..30)) {
            let h = harness(12_000, TierConfig::default());
            for (i, n) in sizes.into_iter().enumerate() {
                let project = pid(&format!("p{}", i % 4));
                match h.artifacts.store_image(&project, ArtifactKind::Character, png(n), Metadata::new()) {
                    Ok(_) => {}
                    Err(e) => prop_assert!(e.is_storage_full()),
                }
                prop_assert!(h.store.used_bytes().unwrap() <= 12_000);
            }
        }
    }
}
