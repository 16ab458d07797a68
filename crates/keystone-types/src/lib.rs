//! Foundation types for Keystone.
//!
//! This crate provides the data model shared by every other Keystone crate:
//! the [`Node`] tree, slash-delimited [`KeyPath`]s, the reserved marker
//! constants, and the [`Clock`] abstraction used by the fetch cache.
//!
//! # Key Types
//!
//! - [`Node`]: A scalar, sequence, mapping, or symbolic reference
//! - [`KeyPath`]: Parsed path of segments into a [`Node`] tree
//! - [`ExpiryRecord`]: Freshness bookkeeping for cached entries
//! - [`Clock`]: Millisecond wall clock, swappable in tests

pub mod error;
pub mod node;
pub mod path;
pub mod temporal;

pub use error::TypeError;
pub use node::Node;
pub use path::{
    is_reference, reference, references, unreference, unreferences, KeyPath, EXPIRY_KEY,
    REF_MARKER, SEPARATOR,
};
pub use temporal::{Clock, ExpiryRecord, ManualClock, SystemClock};
