//! Quota management for the Reel primary store.
//!
//! The [`QuotaManager`] tracks aggregate byte usage of a
//! [`KeyValueStore`](reel_store::KeyValueStore), classifies its health, and
//! runs the space-reclaiming passes:
//!
//! - **Eviction**: the bounded insert-with-eviction protocol in
//!   [`eviction`], driven by an [`EvictionTarget`] that knows how to demote
//!   artifacts.
//! - **Compression**: a structural optimization (null/empty field removal)
//!   kept only when strictly smaller, tagged with `<key>_compressed`.
//! - **Deduplication**: BLAKE3 fingerprints confirmed by byte equality.
//! - **Stale sweep**: transient keys older than the configured age.
//!
//! Usage figures are recomputed from the store on every call; nothing here
//! caches them across operations.

pub mod analysis;
pub mod compress;
pub mod config;
pub mod dedup;
pub mod error;
pub mod eviction;
pub mod manager;
pub mod status;
pub mod sweep;

pub use analysis::{
    render_report, KeyDetails, KeyUsage, OptimizationAnalysis, OptimizationReport, StorageStats,
    ValueShape,
};
pub use compress::{optimize_structure, CompressionAnalysis, CompressionReport};
pub use config::QuotaConfig;
pub use dedup::{DedupAnalysis, DedupReport, Fingerprint};
pub use error::{QuotaError, QuotaResult};
pub use eviction::{EvictionReport, EvictionTarget, RetryPolicy};
pub use manager::{QuotaManager, WriteReport};
pub use status::{Health, Severity, StorageRecommendation, StorageStatus};
pub use sweep::CleanupReport;
