//! Metadata snapshots for Reel.
//!
//! A [`BackupCoordinator`] copies the well-known project metadata keys out
//! of the primary store into a [`BackupSnapshot`], kept in a separate
//! [`BackupStore`]. Generated image and video lists are reduced to
//! summaries and every `data:` URL is removed before a snapshot is stored,
//! so snapshots never carry artifact binaries.
//!
//! Retention is by age ([`BackupConfig::max_backup_age_days`]) and by count
//! ([`BackupConfig::max_backup_count`]).

pub mod config;
pub mod coordinator;
pub mod error;
pub mod metadata;
pub mod scrub;
pub mod snapshot;
pub mod store;

pub use config::BackupConfig;
pub use coordinator::{
    BackupAnalysis, BackupCleanupReport, BackupCoordinator, ImportOutcome, RestoreOutcome,
};
pub use error::{BackupError, BackupResult};
pub use metadata::{KvMetadataStore, MetadataStore, BINARY_KEYS, METADATA_KEYS};
pub use scrub::{contains_binary, scrub_payload};
pub use snapshot::{count_items, BackupKind, BackupSnapshot, BackupSummary, SnapshotPayload};
pub use store::{BackupStore, DirBackupStore, MemoryBackupStore};
