//! Capacity-bounded primary storage for Reel.
//!
//! This crate provides the leaf components of the artifact storage stack:
//! a durable, byte-bounded key/value store and a factory for lightweight
//! blob reference handles that live outside the store's capacity.
//!
//! # Storage Backends
//!
//! All backends implement the [`KeyValueStore`] trait:
//!
//! - [`MemoryStore`] -- `BTreeMap`-based store for tests and embedding
//! - [`DirStore`] -- one file per key under a root directory
//!
//! [`BudgetedStore`] wraps any backend and caps it at a byte budget below
//! its own capacity.
//!
//! # Design Rules
//!
//! 1. The capacity is a hard ceiling: a write that would exceed it fails with
//!    [`StoreError::CapacityExceeded`] and leaves the store untouched.
//! 2. An entry costs `key.len() + value.len()` bytes.
//! 3. Batch writes are all-or-nothing with respect to capacity.
//!    `compare_and_set` compares and writes under one guard.
//! 4. Keys enumerate in sorted order so scans are deterministic.
//! 5. The store never interprets values -- it is a pure key-value store.
//! 6. All I/O errors are propagated, never silently ignored.
//!
//! The key-name conventions in [`keys`] are reserved for the quota layer.

pub mod blob;
pub mod budget;
pub mod dir;
pub mod error;
pub mod keys;
pub mod memory;
pub mod traits;

pub use blob::{BlobHandle, BlobReferenceFactory, BlobRegistry};
pub use budget::BudgetedStore;
pub use dir::DirStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use traits::{entry_size, KeyValueStore};
