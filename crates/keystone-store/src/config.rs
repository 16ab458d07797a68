use serde::{Deserialize, Serialize};

use keystone_refs::DEFAULT_MAX_HOPS;

/// Configuration for a [`Store`](crate::Store).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct StoreConfig {
    /// When `true`, writes build a new tree sharing untouched subtrees
    /// instead of mutating in place. Individual writes may override this.
    pub immutable: bool,
    /// Initial writeability.
    pub writeable: bool,
    /// Reference hops allowed before resolution reports a cycle.
    pub max_reference_hops: usize,
    /// Expansion depth used by `get` when the caller does not pass one.
    pub default_reference_depth: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            immutable: false,
            writeable: true,
            max_reference_hops: DEFAULT_MAX_HOPS,
            default_reference_depth: 1,
        }
    }
}

impl StoreConfig {
    /// A configuration whose writes are persistent (copy-on-write spine).
    pub fn immutable() -> Self {
        Self {
            immutable: true,
            ..Default::default()
        }
    }
}
