use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid sequence index '{segment}' in path {path}")]
    InvalidIndex { path: String, segment: String },

    #[error("cannot descend into scalar at '{segment}' in path {path}")]
    NotTraversable { path: String, segment: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}
