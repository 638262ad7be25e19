use reel_store::StoreError;

/// Errors from backup operations.
///
/// Missing snapshots and rejected imports are outcomes, not errors; see
/// [`RestoreOutcome`](crate::RestoreOutcome) and
/// [`ImportOutcome`](crate::ImportOutcome).
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("invalid backup config: {0}")]
    InvalidConfig(String),

    /// A stored snapshot could not be decoded.
    #[error("corrupt snapshot {name}: {reason}")]
    Corrupt { name: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("lock poisoned: {0}")]
    Poisoned(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result alias for backup operations.
pub type BackupResult<T> = Result<T, BackupError>;
