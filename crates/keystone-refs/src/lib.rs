//! Reference resolution for Keystone.
//!
//! A Keystone tree may hold [`Node::Reference`](keystone_types::Node)
//! values: "this location's value is found at that other path". This crate
//! turns paths that pass through references into canonical paths, and
//! expands references inside returned values up to a requested depth.
//!
//! # Rules
//!
//! - A canonical path never passes through a reference.
//! - Resolution runs to a fixed point but is bounded; exceeding the bound
//!   is reported as [`RefError::CyclicReference`], never a hang.
//! - Expansion consumes one level of depth per reference followed; walking
//!   into mappings and sequences is free.
//!
//! # Modules
//!
//! - [`error`]: Error types for resolution
//! - [`resolver`]: The [`ReferenceResolver`]

pub mod error;
pub mod resolver;

pub use error::{RefError, Result};
pub use resolver::{ReferenceResolver, DEFAULT_MAX_HOPS};
