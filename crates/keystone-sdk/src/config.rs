use keystone_fetch::FetchConfig;
use keystone_store::StoreConfig;
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Construction-time configuration of a [`KeyStore`](crate::KeyStore).
///
/// Every section is optional in TOML:
///
/// ```toml
/// is_fetchable = true
///
/// [store]
/// immutable = true
///
/// [fetch]
/// max_stale_age_secs = 60
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// Enable `fetch`. Requires a transport at construction.
    pub is_fetchable: bool,
    pub store: StoreConfig,
    pub fetch: FetchConfig,
}

impl KeyStoreConfig {
    pub fn from_toml_str(source: &str) -> SdkResult<Self> {
        toml::from_str(source).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Config(e.to_string()))
    }
}
