use thiserror::Error;

/// Errors produced by type construction and parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("project id must not be empty")]
    EmptyProjectId,

    #[error("invalid identifier {value:?}: {reason}")]
    InvalidId { value: String, reason: String },

    #[error("unknown artifact kind: {0}")]
    UnknownKind(String),
}
