//! Error types for reference resolution.

use thiserror::Error;

/// Errors that can occur while resolving references.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefError {
    /// Resolution followed more references than allowed, which only happens
    /// when references form a cycle (or an absurdly long chain).
    #[error("cyclic reference while resolving {path}: gave up after {hops} hops")]
    CyclicReference { path: String, hops: usize },
}

/// Convenience type alias for resolution results.
pub type Result<T> = std::result::Result<T, RefError>;
