use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReelError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] reel_store::StoreError),

    #[error("quota error: {0}")]
    Quota(#[from] reel_quota::QuotaError),

    #[error("artifact error: {0}")]
    Artifact(#[from] reel_artifact::ArtifactError),

    #[error("backup error: {0}")]
    Backup(#[from] reel_backup::BackupError),
}

pub type ReelResult<T> = Result<T, ReelError>;
