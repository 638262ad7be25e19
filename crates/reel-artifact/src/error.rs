use reel_quota::QuotaError;
use reel_store::StoreError;
use reel_types::ArtifactId;

/// Errors from artifact operations.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// The artifact was recorded in memory but could not be persisted.
    #[error("storage full, artifact {artifact_id} kept in memory only: {source}")]
    StorageFull {
        artifact_id: ArtifactId,
        #[source]
        source: QuotaError,
    },

    /// A tier configuration value is out of range.
    #[error("invalid tier config: {0}")]
    InvalidConfig(String),

    /// A persisted project record could not be decoded.
    #[error("corrupt project record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ArtifactError {
    /// Returns `true` for any storage-full outcome.
    pub fn is_storage_full(&self) -> bool {
        match self {
            Self::StorageFull { .. } => true,
            Self::Quota(e) => e.is_storage_full(),
            _ => false,
        }
    }
}

/// Result alias for artifact operations.
pub type ArtifactResult<T> = Result<T, ArtifactError>;
