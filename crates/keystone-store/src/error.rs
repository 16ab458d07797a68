use keystone_refs::RefError;
use keystone_types::TypeError;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A write was attempted while the store is not writeable.
    #[error("store is not writeable: cannot set {path}")]
    NotWritable { path: String },

    /// The store has been destroyed.
    #[error("store has been destroyed")]
    Destroyed,

    /// Reference resolution failed (cyclic references).
    #[error(transparent)]
    Ref(#[from] RefError),

    /// The write could not be applied to the tree shape.
    #[error("invalid write: {0}")]
    Type(#[from] TypeError),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A lock around shared store state was poisoned.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
