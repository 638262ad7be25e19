/// Errors from key/value store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The write would push usage past the store's hard capacity.
    #[error("capacity exceeded writing {key:?}: requires {required} bytes, {available} available")]
    CapacityExceeded {
        key: String,
        required: u64,
        available: u64,
    },

    /// The key cannot be stored by this backend.
    #[error("invalid key {0:?}")]
    InvalidKey(String),

    /// A stored value could not be decoded.
    #[error("corrupt entry {key:?}: {reason}")]
    Corrupt { key: String, reason: String },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A lock guarding backend state was poisoned by a panicking writer.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),
}

impl StoreError {
    /// Returns `true` for the capacity-exceeded signal.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
