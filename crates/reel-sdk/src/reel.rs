use std::path::Path;
use std::sync::Arc;

use tracing::info;

use reel_artifact::ArtifactStore;
use reel_backup::{BackupCoordinator, BackupStore, DirBackupStore, KvMetadataStore, MemoryBackupStore};
use reel_quota::QuotaManager;
use reel_store::{BlobRegistry, DirStore, KeyValueStore, MemoryStore};
use reel_types::{Clock, MonotonicClock, SystemClock};

use crate::config::ReelConfig;
use crate::error::ReelResult;
use crate::maintenance::{self, MaintenanceHandle};

const STORE_DIR: &str = "store";
const BACKUP_DIR: &str = "backups";

/// One wired-up set of Reel services.
///
/// The artifact store, quota manager and backup coordinator share one
/// primary store, one blob registry and one clock. Every service writes
/// through the quota manager's budgeted view of the store, so the byte
/// budget holds even over a backend with more capacity. Build several
/// `Reel`s for isolated instances; nothing here is global.
pub struct Reel {
    config: ReelConfig,
    store: Arc<dyn KeyValueStore>,
    blobs: Arc<BlobRegistry>,
    clock: Arc<MonotonicClock>,
    quota: Arc<QuotaManager>,
    artifacts: Arc<ArtifactStore>,
    backups: Arc<BackupCoordinator>,
}

impl Reel {
    /// Wire services over the given stores and clock.
    pub fn open(
        store: Arc<dyn KeyValueStore>,
        backup_store: Arc<dyn BackupStore>,
        clock: Arc<dyn Clock>,
        config: ReelConfig,
    ) -> ReelResult<Self> {
        config.validate()?;
        let blobs = Arc::new(BlobRegistry::new());
        let monotonic = Arc::new(MonotonicClock::new(clock.clone()));
        let quota = Arc::new(QuotaManager::new(
            store.clone(),
            clock.clone(),
            config.quota.clone(),
        )?);
        let artifacts = Arc::new(ArtifactStore::open(
            quota.clone(),
            blobs.clone(),
            monotonic.clone(),
            config.tier.clone(),
        )?);
        let backups = Arc::new(BackupCoordinator::new(
            Arc::new(KvMetadataStore::new(quota.store().clone())),
            backup_store,
            clock,
            config.backup.clone(),
        )?);
        let backend_capacity = store.capacity();
        let store = quota.store().clone();
        info!(
            capacity = backend_capacity,
            max_bytes = quota.max_bytes(),
            hot_projects = config.tier.materialized_projects,
            "reel opened"
        );
        Ok(Self {
            config,
            store,
            blobs,
            clock: monotonic,
            quota,
            artifacts,
            backups,
        })
    }

    /// In-memory stores sized to the quota budget, wall clock.
    pub fn in_memory(config: ReelConfig) -> ReelResult<Self> {
        let store = Arc::new(MemoryStore::new(config.quota.max_bytes));
        Self::open(
            store,
            Arc::new(MemoryBackupStore::new()),
            Arc::new(SystemClock),
            config,
        )
    }

    /// Directory-backed stores under `root`: entries in `root/store`,
    /// snapshots in `root/backups`.
    pub fn open_dir(root: impl AsRef<Path>, config: ReelConfig) -> ReelResult<Self> {
        let root = root.as_ref();
        let store = Arc::new(DirStore::open(root.join(STORE_DIR), config.quota.max_bytes)?);
        let backups = Arc::new(DirBackupStore::open(root.join(BACKUP_DIR))?);
        Self::open(store, backups, Arc::new(SystemClock), config)
    }

    pub fn config(&self) -> &ReelConfig {
        &self.config
    }

    /// The primary store, capped at the quota budget.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn blobs(&self) -> &Arc<BlobRegistry> {
        &self.blobs
    }

    pub fn clock(&self) -> &Arc<MonotonicClock> {
        &self.clock
    }

    pub fn quota(&self) -> &Arc<QuotaManager> {
        &self.quota
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    pub fn backups(&self) -> &Arc<BackupCoordinator> {
        &self.backups
    }

    /// Start the periodic stale sweep and backup retention tasks.
    ///
    /// Must be called from within a tokio runtime. The tasks stop when the
    /// returned handle is shut down or dropped.
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        maintenance::spawn(
            self.quota.clone(),
            self.backups.clone(),
            &self.config.maintenance,
        )
    }
}

impl std::fmt::Debug for Reel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reel")
            .field("config", &self.config)
            .field("artifacts", &self.artifacts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_backup::RestoreOutcome;
    use reel_types::{ArtifactKind, ProjectId};
    use serde_json::json;

    fn project(name: &str) -> ProjectId {
        ProjectId::new(name).unwrap()
    }

    #[test]
    fn in_memory_services_share_one_store() {
        let reel = Reel::in_memory(ReelConfig::default()).unwrap();
        let receipt = reel
            .artifacts()
            .store_image(&project("p1"), ArtifactKind::Character, vec![7; 256], Default::default())
            .unwrap();
        assert!(receipt.materialized);
        let status = reel.quota().storage_status().unwrap();
        assert!(status.used_bytes > 256);
        assert_eq!(status.used_bytes, reel.store().used_bytes().unwrap());
    }

    #[test]
    fn backups_see_metadata_written_through_quota() {
        let reel = Reel::in_memory(ReelConfig::default()).unwrap();
        reel.quota()
            .set_item("story", &json!({"title": "The Lighthouse", "chapters": 3}))
            .unwrap();
        let snapshot = reel.backups().create_backup("first").unwrap();
        assert!(snapshot.payload.contains_key("story"));

        reel.quota().delete_key("story").unwrap();
        let outcome = reel.backups().restore_backup(&snapshot.id).unwrap();
        assert!(matches!(outcome, RestoreOutcome::Restored { .. }));
        assert!(reel.store().contains("story").unwrap());
    }

    #[test]
    fn open_dir_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let reel = Reel::open_dir(dir.path(), ReelConfig::default()).unwrap();
            reel.backups().create_backup("on disk").unwrap();
            reel.artifacts()
                .store_image(&project("p1"), ArtifactKind::Background, vec![1, 2, 3], Default::default())
                .unwrap()
                .artifact_id
        };
        let reel = Reel::open_dir(dir.path(), ReelConfig::default()).unwrap();
        assert_eq!(reel.backups().list_backups().unwrap().len(), 1);
        assert_eq!(reel.artifacts().load_payload(&id).unwrap(), Some(vec![1, 2, 3]));
        assert!(dir.path().join(STORE_DIR).is_dir());
        assert!(dir.path().join(BACKUP_DIR).is_dir());
    }

    #[test]
    fn budget_applies_over_a_larger_backend() {
        let mut config = ReelConfig::default();
        config.quota.max_bytes = 20_000;
        let reel = Reel::open(
            Arc::new(MemoryStore::new(1_000_000)),
            Arc::new(MemoryBackupStore::new()),
            Arc::new(SystemClock),
            config,
        )
        .unwrap();
        assert_eq!(reel.store().capacity(), 20_000);
        for _ in 0..40 {
            let _ = reel.artifacts().store_image(
                &project("p1"),
                ArtifactKind::Character,
                vec![9; 1_000],
                Default::default(),
            );
            assert!(reel.store().used_bytes().unwrap() <= 20_000);
        }
        assert!(reel
            .store()
            .set("story", &"x".repeat(25_000))
            .unwrap_err()
            .is_capacity_exceeded());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ReelConfig::default();
        config.tier.materialized_projects = 0;
        assert!(Reel::in_memory(config).is_err());
    }
}
