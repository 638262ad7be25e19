//! Tiered artifact storage.
//!
//! An [`ArtifactStore`] keeps one [`ProjectArtifactSet`] per project and
//! applies a recency-based tier policy:
//!
//! - the `K` most recently accessed projects store new payloads
//!   materialized (real bytes in the primary store);
//! - every other project holds only [`BlobHandle`](reel_store::BlobHandle)
//!   references, and demotion is never reversed;
//! - projects beyond `2K` are deleted outright;
//! - a project with `MaxArtifactsPerProject` materialized artifacts has its
//!   oldest half demoted before the next insert.
//!
//! Each project is persisted as one JSON record under
//! `reel:project:<id>:artifacts`, written through the quota manager's
//! bounded insert-with-eviction protocol.

pub mod artifact;
pub mod config;
pub mod error;
pub mod store;
mod tier;

pub use artifact::{sniff_mime, Artifact, Metadata, Payload, ProjectArtifactSet};
pub use config::TierConfig;
pub use error::{ArtifactError, ArtifactResult};
pub use store::{ArtifactStats, ArtifactStore, StoreReceipt};
pub use tier::RebalanceReport;
