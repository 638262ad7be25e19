//! High-level SDK for Reel.
//!
//! [`Reel`] wires the artifact store, quota manager and backup coordinator
//! over one primary store from a [`ReelConfig`], and can start the periodic
//! stale sweep and backup retention tasks on a tokio runtime.

pub mod config;
pub mod error;
pub mod maintenance;
pub mod reel;

pub use config::{MaintenanceConfig, ReelConfig};
pub use error::{ReelError, ReelResult};
pub use maintenance::MaintenanceHandle;
pub use reel::Reel;

// Re-export key types
pub use reel_artifact::{Artifact, ArtifactStats, ArtifactStore, Payload, StoreReceipt, TierConfig};
pub use reel_backup::{
    BackupAnalysis, BackupCleanupReport, BackupConfig, BackupCoordinator, BackupKind,
    BackupSnapshot, ImportOutcome, RestoreOutcome,
};
pub use reel_quota::{
    render_report, Health, OptimizationAnalysis, OptimizationReport, QuotaConfig, QuotaManager,
    StorageStatus,
};
pub use reel_types::{ArtifactId, ArtifactKind, BackupId, ProjectId};
