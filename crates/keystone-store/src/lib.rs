//! Hierarchical in-memory data store for Keystone.
//!
//! The [`Store`] owns one [`Node`](keystone_types::Node) tree and exposes
//! path-addressed reads and writes that understand symbolic references.
//!
//! # Design Rules
//!
//! 1. Reads resolve references in the path, then expand references inside
//!    the result up to the requested depth (default 1).
//! 2. Writes resolve the path fully and never alias data handed out by an
//!    earlier read: shared subtrees are copied before they are written.
//! 3. Immutable writes replace the root only when the value actually
//!    changes, sharing every untouched subtree with the previous root.
//! 4. While writes are disabled, reads are memoised per `(path, depth)`;
//!    enabling writes or destroying the store discards the memo.
//! 5. [`Store::to_json`] (and therefore `serde` serialization of the
//!    store) honours serialisability marks; [`Store::dump`] ignores them.

pub mod config;
pub mod error;
pub mod options;
pub mod shared;
pub mod store;

// Re-export primary types at crate root for ergonomic imports.
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use options::{GetOptions, SetOptions};
pub use shared::SharedStore;
pub use store::Store;
