//! Foundation types for Reel.
//!
//! Every other Reel crate depends on `reel-types`. It carries no storage
//! logic of its own, only the vocabulary the storage services share.
//!
//! # Key Types
//!
//! - [`ArtifactId`]: UUID v7 identifier assigned when an artifact is stored
//! - [`ProjectId`]: non-empty owning-project identifier
//! - [`BackupId`]: UUID v7 identifier of a metadata snapshot
//! - [`ArtifactKind`]: caller-supplied artifact classification
//! - [`Timestamp`]: strictly ordered (millis, logical) stamp
//! - [`Clock`] / [`MonotonicClock`]: injectable time sources

pub mod error;
pub mod id;
pub mod kind;
pub mod temporal;

pub use error::TypeError;
pub use id::{ArtifactId, BackupId, ProjectId};
pub use kind::ArtifactKind;
pub use temporal::{Clock, ManualClock, MonotonicClock, SystemClock, Timestamp};
