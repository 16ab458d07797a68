use serde::{Deserialize, Serialize};

/// Options recognised by `get`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetOptions {
    /// How many levels of references to expand. `None` uses the store
    /// default (1).
    pub reference_depth: Option<u32>,
}

impl GetOptions {
    /// Options with an explicit reference depth.
    pub fn depth(reference_depth: u32) -> Self {
        Self {
            reference_depth: Some(reference_depth),
        }
    }
}

/// Options recognised by `set`, `set_all` and `remove`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SetOptions {
    /// Override the store's immutability for this write.
    pub immutable: Option<bool>,
}

impl SetOptions {
    pub fn immutable() -> Self {
        Self {
            immutable: Some(true),
        }
    }

    pub fn in_place() -> Self {
        Self {
            immutable: Some(false),
        }
    }
}
