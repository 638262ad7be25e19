//! In-memory tier state and the policy that moves artifacts between tiers.
//!
//! Nothing here locks; [`ArtifactStore`](crate::ArtifactStore) owns the one
//! `Mutex` around [`TierState`] and calls into it while holding the lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use reel_quota::EvictionTarget;
use reel_store::{entry_size, keys, BlobReferenceFactory, KeyValueStore, StoreError, StoreResult};
use reel_types::{ArtifactId, ProjectId, Timestamp};

use crate::artifact::{record_key, Artifact, Payload, ProjectArtifactSet};
use crate::config::TierConfig;

/// What a rebalance changed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceReport {
    /// Artifacts demoted because their project left the top K.
    pub demoted: usize,
    /// Projects deleted for falling beyond the retention bound.
    pub deleted_projects: Vec<ProjectId>,
}

#[derive(Default)]
pub(crate) struct TierState {
    pub projects: BTreeMap<ProjectId, ProjectArtifactSet>,
    pub index: HashMap<ArtifactId, ProjectId>,
    /// Projects whose record must be rewritten.
    pub dirty: BTreeSet<ProjectId>,
    /// Projects whose record must be deleted.
    pub removed: BTreeSet<ProjectId>,
}

/// Replace a materialized payload with a reference handle. Returns `false`
/// if the artifact was already referenced.
pub(crate) fn demote(artifact: &mut Artifact, blobs: &dyn BlobReferenceFactory) -> bool {
    let Payload::Materialized(bytes) = &artifact.payload else {
        return false;
    };
    let handle = blobs.create(bytes, &artifact.mime);
    artifact.payload = Payload::Referenced(handle);
    true
}

fn release_all(set: &ProjectArtifactSet, blobs: &dyn BlobReferenceFactory) -> usize {
    set.artifacts
        .iter()
        .filter_map(|a| a.payload.handle())
        .filter(|h| blobs.release(h))
        .count()
}

impl TierState {
    /// Adopt a set loaded from storage.
    pub fn adopt(&mut self, set: ProjectArtifactSet) {
        for a in &set.artifacts {
            self.index.insert(a.id, set.project_id.clone());
        }
        self.projects.insert(set.project_id.clone(), set);
    }

    /// Project ids by `last_accessed_at`, most recent first.
    pub fn ranked(&self) -> Vec<ProjectId> {
        let mut sets: Vec<&ProjectArtifactSet> = self.projects.values().collect();
        sets.sort_by(|a, b| {
            b.last_accessed_at
                .cmp(&a.last_accessed_at)
                .then_with(|| a.project_id.cmp(&b.project_id))
        });
        sets.into_iter().map(|s| s.project_id.clone()).collect()
    }

    /// Whether `project` is among the `k` most recently accessed.
    pub fn is_hot(&self, project: &ProjectId, k: usize) -> bool {
        self.ranked().iter().take(k).any(|p| p == project)
    }

    /// Record an access, creating the set if needed.
    pub fn touch(&mut self, project: &ProjectId, now: Timestamp) -> &mut ProjectArtifactSet {
        self.dirty.insert(project.clone());
        self.removed.remove(project);
        let set = self
            .projects
            .entry(project.clone())
            .or_insert_with(|| ProjectArtifactSet::new(project.clone(), now));
        set.last_accessed_at = now;
        set
    }

    /// If `project` holds `max` or more materialized artifacts, demote the
    /// oldest half of them. Returns the number demoted.
    pub fn enforce_project_cap(
        &mut self,
        project: &ProjectId,
        max: usize,
        blobs: &dyn BlobReferenceFactory,
    ) -> usize {
        let Some(set) = self.projects.get_mut(project) else {
            return 0;
        };
        let materialized = set.materialized_count();
        if materialized < max {
            return 0;
        }
        let mut order: Vec<usize> = (0..set.artifacts.len())
            .filter(|&i| set.artifacts[i].is_materialized())
            .collect();
        order.sort_by_key(|&i| set.artifacts[i].created_at);
        let quota = materialized / 2;
        let demoted = order
            .into_iter()
            .take(quota)
            .filter(|&i| demote(&mut set.artifacts[i], blobs))
            .count();
        self.dirty.insert(project.clone());
        info!(project = %project, demoted, materialized, max, "project cap reached, oldest half demoted");
        demoted
    }

    pub fn insert(&mut self, artifact: Artifact) {
        let project = artifact.project_id.clone();
        if let Some(set) = self.projects.get_mut(&project) {
            self.index.insert(artifact.id, project.clone());
            set.artifacts.push(artifact);
            self.dirty.insert(project);
        }
    }

    /// Apply the tier policy: projects beyond the top K lose every
    /// materialized payload; projects beyond the retention bound are
    /// deleted. Projects entering the top K are not re-materialized.
    pub fn rebalance(
        &mut self,
        config: &TierConfig,
        blobs: &dyn BlobReferenceFactory,
    ) -> RebalanceReport {
        let ranked = self.ranked();
        let mut report = RebalanceReport::default();

        for project in ranked.iter().skip(config.retained_projects()) {
            if self.remove_project(project, blobs).is_some() {
                report.deleted_projects.push(project.clone());
            }
        }

        for project in ranked
            .iter()
            .skip(config.materialized_projects)
            .take(config.retained_projects().saturating_sub(config.materialized_projects))
        {
            let Some(set) = self.projects.get_mut(project) else {
                continue;
            };
            let demoted = set
                .artifacts
                .iter_mut()
                .map(|a| demote(a, blobs))
                .filter(|&d| d)
                .count();
            if demoted > 0 {
                self.dirty.insert(project.clone());
                debug!(project = %project, demoted, "project left the hot tier");
                report.demoted += demoted;
            }
        }

        if report.demoted > 0 || !report.deleted_projects.is_empty() {
            info!(
                demoted = report.demoted,
                deleted_projects = report.deleted_projects.len(),
                "tier rebalanced"
            );
        }
        report
    }

    /// Demote the globally oldest `count` materialized artifacts.
    pub fn evict_oldest(&mut self, count: usize, blobs: &dyn BlobReferenceFactory) -> usize {
        let mut candidates: Vec<(Timestamp, ProjectId, ArtifactId)> = self
            .projects
            .values()
            .flat_map(|set| set.artifacts.iter())
            .filter(|a| a.is_materialized())
            .map(|a| (a.created_at, a.project_id.clone(), a.id))
            .collect();
        candidates.sort();

        let mut evicted = 0;
        for (_, project, id) in candidates.into_iter().take(count) {
            let Some(set) = self.projects.get_mut(&project) else {
                continue;
            };
            if let Some(a) = set.artifacts.iter_mut().find(|a| a.id == id) {
                if demote(a, blobs) {
                    evicted += 1;
                    self.dirty.insert(project);
                }
            }
        }
        evicted
    }

    /// Remove one artifact, releasing its handle. An emptied project is
    /// removed too.
    pub fn remove_artifact(
        &mut self,
        id: &ArtifactId,
        blobs: &dyn BlobReferenceFactory,
    ) -> Option<Artifact> {
        let project = self.index.remove(id)?;
        let set = self.projects.get_mut(&project)?;
        let pos = set.artifacts.iter().position(|a| &a.id == id)?;
        let artifact = set.artifacts.remove(pos);
        if let Some(handle) = artifact.payload.handle() {
            blobs.release(handle);
        }
        if set.artifacts.is_empty() {
            self.projects.remove(&project);
            self.dirty.remove(&project);
            self.removed.insert(project);
        } else {
            self.dirty.insert(project);
        }
        Some(artifact)
    }

    /// Remove a whole project, releasing all of its handles.
    pub fn remove_project(
        &mut self,
        project: &ProjectId,
        blobs: &dyn BlobReferenceFactory,
    ) -> Option<ProjectArtifactSet> {
        let set = self.projects.remove(project)?;
        for a in &set.artifacts {
            self.index.remove(&a.id);
        }
        let released = release_all(&set, blobs);
        self.dirty.remove(project);
        self.removed.insert(project.clone());
        debug!(project = %project, artifacts = set.artifacts.len(), released, "project removed");
        Some(set)
    }

    pub fn find(&self, id: &ArtifactId) -> Option<&Artifact> {
        let project = self.index.get(id)?;
        self.projects.get(project)?.get(id)
    }

    /// Release every live handle. Artifacts keep their (now dead) handles.
    pub fn release_references(&self, blobs: &dyn BlobReferenceFactory) -> usize {
        self.projects.values().map(|s| release_all(s, blobs)).sum()
    }

    fn encode(set: &ProjectArtifactSet) -> StoreResult<String> {
        serde_json::to_string(set).map_err(|e| StoreError::Corrupt {
            key: record_key(&set.project_id),
            reason: e.to_string(),
        })
    }

    /// Bytes the pending writes would add to the store.
    pub fn pending_growth(&self, store: &dyn KeyValueStore) -> StoreResult<u64> {
        let mut before = 0u64;
        let mut after = 0u64;
        for project in &self.dirty {
            let Some(set) = self.projects.get(project) else {
                continue;
            };
            let key = record_key(project);
            before += store.entry_size(&key)?.unwrap_or(0);
            after += entry_size(&key, &Self::encode(set)?);
        }
        Ok(after.saturating_sub(before))
    }

    /// Write every pending change. Deletions go first; the rewrites are one
    /// atomic batch, so a capacity failure changes none of them. Records are
    /// always written in full form, so any compression tag on a deleted or
    /// rewritten record is dropped.
    pub fn flush(&mut self, store: &dyn KeyValueStore) -> StoreResult<()> {
        while let Some(project) = self.removed.first().cloned() {
            let key = record_key(&project);
            store.delete(&key)?;
            store.delete(&keys::compressed_tag_key(&key))?;
            self.removed.remove(&project);
        }
        let mut batch = Vec::with_capacity(self.dirty.len());
        for project in &self.dirty {
            if let Some(set) = self.projects.get(project) {
                batch.push((record_key(project), Self::encode(set)?));
            }
        }
        if !batch.is_empty() {
            store.set_many(&batch)?;
            for (key, _) in &batch {
                store.delete(&keys::compressed_tag_key(key))?;
            }
        }
        self.dirty.clear();
        Ok(())
    }
}

/// Borrowed view of the tier state driven by the eviction protocol.
pub(crate) struct Flush<'a> {
    pub state: &'a mut TierState,
    pub blobs: &'a dyn BlobReferenceFactory,
}

impl EvictionTarget for Flush<'_> {
    fn persist(&mut self, store: &dyn KeyValueStore) -> StoreResult<()> {
        self.state.flush(store)
    }

    fn evict_oldest(&mut self, count: usize) -> usize {
        let evicted = self.state.evict_oldest(count, self.blobs);
        debug!(requested = count, evicted, "evicted oldest materialized artifacts");
        evicted
    }
}
