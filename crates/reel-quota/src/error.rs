use reel_store::StoreError;

/// Errors from quota operations.
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// The write could not be made to fit even after bounded eviction.
    #[error("storage full after {attempts} eviction attempt(s) ({evicted} demoted): {reason}")]
    StorageFull {
        attempts: u32,
        evicted: usize,
        reason: String,
    },

    /// A configuration value is out of range.
    #[error("invalid quota config: {0}")]
    InvalidConfig(String),

    /// A value could not be serialized for storage.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Error from the backing store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl QuotaError {
    /// Returns `true` for the `StorageFull` outcome.
    pub fn is_storage_full(&self) -> bool {
        matches!(self, Self::StorageFull { .. })
    }
}

/// Result alias for quota operations.
pub type QuotaResult<T> = Result<T, QuotaError>;
