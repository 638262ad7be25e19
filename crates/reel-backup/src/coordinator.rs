use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use reel_types::{BackupId, Clock};

use crate::config::BackupConfig;
use crate::error::{BackupError, BackupResult};
use crate::metadata::{MetadataStore, BINARY_KEYS, METADATA_KEYS};
use crate::scrub::scrub_payload;
use crate::snapshot::{BackupKind, BackupSnapshot, BackupSummary, SnapshotPayload};
use crate::store::BackupStore;

const IMPORT_PREFIX: &str = "imported: ";

/// Result of [`BackupCoordinator::restore_backup`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum RestoreOutcome {
    Restored { id: BackupId, keys: Vec<String> },
    Failed { reason: String },
}

impl RestoreOutcome {
    pub fn is_restored(&self) -> bool {
        matches!(self, Self::Restored { .. })
    }
}

/// Result of [`BackupCoordinator::import_backup`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum ImportOutcome {
    Imported { id: BackupId },
    Rejected { reason: String },
}

/// Snapshots removed by a deletion or retention pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupCleanupReport {
    pub deleted: Vec<BackupId>,
    pub freed_bytes: u64,
    pub errors: Vec<String>,
}

impl BackupCleanupReport {
    fn record(&mut self, snapshot: &BackupSnapshot) {
        self.deleted.push(snapshot.id);
        self.freed_bytes += snapshot.size_bytes;
    }

    pub fn merge(&mut self, other: BackupCleanupReport) {
        self.deleted.extend(other.deleted);
        self.freed_bytes += other.freed_bytes;
        self.errors.extend(other.errors);
    }
}

/// Aggregate view of all snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupAnalysis {
    pub total_backups: usize,
    pub total_bytes: u64,
    pub oldest: Option<BackupSummary>,
    pub newest: Option<BackupSummary>,
    pub largest: Option<BackupSummary>,
    pub count_by_kind: BTreeMap<BackupKind, usize>,
    pub bytes_by_kind: BTreeMap<BackupKind, u64>,
}

/// Creates, lists, restores, and retires metadata snapshots.
///
/// Snapshots are read from and restored into the primary store through a
/// [`MetadataStore`] and kept in a separate [`BackupStore`]. Artifact
/// binaries never enter a snapshot.
pub struct BackupCoordinator {
    metadata: Arc<dyn MetadataStore>,
    backups: Arc<dyn BackupStore>,
    clock: Arc<dyn Clock>,
    config: BackupConfig,
}

impl BackupCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        backups: Arc<dyn BackupStore>,
        clock: Arc<dyn Clock>,
        config: BackupConfig,
    ) -> BackupResult<Self> {
        config.validate()?;
        Ok(Self {
            metadata,
            backups,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Manual snapshot of the current metadata.
    pub fn create_backup(&self, description: &str) -> BackupResult<BackupSnapshot> {
        self.create_backup_of_kind(BackupKind::Manual, description)
    }

    /// Snapshot the current metadata, then trim to the count limit.
    pub fn create_backup_of_kind(
        &self,
        kind: BackupKind,
        description: &str,
    ) -> BackupResult<BackupSnapshot> {
        let keys: Vec<&str> = METADATA_KEYS.iter().chain(BINARY_KEYS).copied().collect();
        let payload = scrub_payload(self.metadata.read(&keys)?);
        let snapshot = BackupSnapshot::new(
            BackupId::new(),
            self.clock.now_ms(),
            kind,
            description,
            payload,
        );
        self.backups.put(&snapshot)?;
        info!(
            id = %snapshot.id,
            kind = %kind,
            bytes = snapshot.size_bytes,
            items = snapshot.item_count,
            "backup created"
        );
        let trimmed = self.enforce_count_limit()?;
        if !trimmed.deleted.is_empty() {
            debug!(deleted = trimmed.deleted.len(), "count limit applied");
        }
        Ok(snapshot)
    }

    /// All snapshots, newest first.
    pub fn list_backups(&self) -> BackupResult<Vec<BackupSnapshot>> {
        self.backups.list()
    }

    pub fn get_backup(&self, id: &BackupId) -> BackupResult<Option<BackupSnapshot>> {
        self.backups.get(id)
    }

    /// Write a snapshot's payload back into the primary store.
    ///
    /// A missing snapshot or a rejected write is reported as
    /// [`RestoreOutcome::Failed`]; the primary store is left untouched in
    /// both cases. Keys absent from the snapshot are not modified.
    pub fn restore_backup(&self, id: &BackupId) -> BackupResult<RestoreOutcome> {
        let Some(snapshot) = self.backups.get(id)? else {
            warn!(id = %id, "restore of unknown backup");
            return Ok(RestoreOutcome::Failed {
                reason: format!("backup {id} not found"),
            });
        };
        if let Err(e) = self.metadata.write(&snapshot.payload) {
            warn!(id = %id, error = %e, "restore failed");
            return Ok(RestoreOutcome::Failed {
                reason: e.to_string(),
            });
        }
        let keys: Vec<String> = snapshot.payload.keys().cloned().collect();
        info!(id = %id, keys = keys.len(), "backup restored");
        Ok(RestoreOutcome::Restored { id: *id, keys })
    }

    /// Returns `true` if the snapshot existed.
    pub fn delete_backup(&self, id: &BackupId) -> BackupResult<bool> {
        let deleted = self.backups.delete(id)?;
        if deleted {
            info!(id = %id, "backup deleted");
        }
        Ok(deleted)
    }

    /// Delete several snapshots. Unknown ids and failed deletions are
    /// collected in `errors`; the rest proceed.
    pub fn delete_selected(&self, ids: &[BackupId]) -> BackupResult<BackupCleanupReport> {
        let mut report = BackupCleanupReport::default();
        for id in ids {
            let snapshot = match self.backups.get(id) {
                Ok(Some(s)) => s,
                Ok(None) => {
                    report.errors.push(format!("backup {id} not found"));
                    continue;
                }
                Err(e) => {
                    report.errors.push(format!("backup {id}: {e}"));
                    continue;
                }
            };
            match self.backups.delete(id) {
                Ok(true) => report.record(&snapshot),
                Ok(false) => report.errors.push(format!("backup {id} not found")),
                Err(e) => report.errors.push(format!("backup {id}: {e}")),
            }
        }
        info!(
            deleted = report.deleted.len(),
            freed = report.freed_bytes,
            errors = report.errors.len(),
            "selected backups deleted"
        );
        Ok(report)
    }

    /// Delete snapshots older than `max_backup_age_days`.
    pub fn prune_expired(&self) -> BackupResult<BackupCleanupReport> {
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(self.config.max_age().as_millis() as u64);
        let expired: Vec<BackupSnapshot> = self
            .backups
            .list()?
            .into_iter()
            .filter(|s| s.timestamp < cutoff)
            .collect();
        let report = self.remove_all(&expired);
        if !report.deleted.is_empty() {
            info!(deleted = report.deleted.len(), freed = report.freed_bytes, "expired backups pruned");
        }
        Ok(report)
    }

    /// Delete the oldest snapshots beyond `max_backup_count`.
    pub fn enforce_count_limit(&self) -> BackupResult<BackupCleanupReport> {
        let excess: Vec<BackupSnapshot> = self
            .backups
            .list()?
            .into_iter()
            .skip(self.config.max_backup_count)
            .collect();
        Ok(self.remove_all(&excess))
    }

    /// Age pruning followed by the count limit.
    pub fn apply_retention(&self) -> BackupResult<BackupCleanupReport> {
        let mut report = self.prune_expired()?;
        report.merge(self.enforce_count_limit()?);
        Ok(report)
    }

    pub fn analysis(&self) -> BackupResult<BackupAnalysis> {
        let snapshots = self.backups.list()?;
        let mut out = BackupAnalysis {
            total_backups: snapshots.len(),
            // list() is newest first
            newest: snapshots.first().map(BackupSnapshot::summary),
            oldest: snapshots.last().map(BackupSnapshot::summary),
            largest: snapshots
                .iter()
                .max_by_key(|s| s.size_bytes)
                .map(BackupSnapshot::summary),
            ..Default::default()
        };
        for s in &snapshots {
            out.total_bytes += s.size_bytes;
            *out.count_by_kind.entry(s.kind).or_default() += 1;
            *out.bytes_by_kind.entry(s.kind).or_default() += s.size_bytes;
        }
        Ok(out)
    }

    /// The snapshot as a pretty-printed JSON document, if it exists.
    pub fn export_backup(&self, id: &BackupId) -> BackupResult<Option<String>> {
        let Some(snapshot) = self.backups.get(id)? else {
            return Ok(None);
        };
        serde_json::to_string_pretty(&snapshot)
            .map(Some)
            .map_err(|e| BackupError::Serialization(e.to_string()))
    }

    /// Store an exported document as a new manual snapshot.
    ///
    /// The document must carry an `id` and an object `payload`. The stored
    /// snapshot gets a fresh id and timestamp, and its payload is scrubbed
    /// again.
    pub fn import_backup(&self, document: &str) -> BackupResult<ImportOutcome> {
        let doc: Value = match serde_json::from_str(document) {
            Ok(doc) => doc,
            Err(e) => return Ok(rejected(format!("not JSON: {e}"))),
        };
        let has_id = match doc.get("id") {
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        };
        if !has_id {
            return Ok(rejected("missing id".into()));
        }
        let payload: SnapshotPayload = match doc.get("payload") {
            Some(Value::Object(map)) => map.clone().into_iter().collect(),
            _ => return Ok(rejected("missing payload".into())),
        };
        let description = doc
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let snapshot = BackupSnapshot::new(
            BackupId::new(),
            self.clock.now_ms(),
            BackupKind::Manual,
            format!("{IMPORT_PREFIX}{description}"),
            scrub_payload(payload),
        );
        self.backups.put(&snapshot)?;
        info!(id = %snapshot.id, bytes = snapshot.size_bytes, "backup imported");
        Ok(ImportOutcome::Imported { id: snapshot.id })
    }

    fn remove_all(&self, snapshots: &[BackupSnapshot]) -> BackupCleanupReport {
        let mut report = BackupCleanupReport::default();
        for s in snapshots {
            match self.backups.delete(&s.id) {
                Ok(true) => report.record(s),
                Ok(false) => {}
                Err(e) => report.errors.push(format!("backup {}: {e}", s.id)),
            }
        }
        report
    }
}

fn rejected(reason: String) -> ImportOutcome {
    warn!(reason = %reason, "backup import rejected");
    ImportOutcome::Rejected { reason }
}

impl std::fmt::Debug for BackupCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
