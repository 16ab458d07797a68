use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the [`FetchCache`](crate::FetchCache).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Upper bound on the `max-age` advertised for a stale value served
    /// after a failed reload, whatever its error-grace window allows.
    pub max_stale_age_secs: u64,
    /// Reload interval used when the server advertises no freshness.
    pub default_reload_interval_ms: u64,
    /// Floor applied to every reload interval.
    pub min_reload_interval_ms: u64,
    /// Retries used when a fetch does not pass its own.
    pub default_retry: u32,
    /// Per-attempt timeout used when a fetch does not pass its own.
    pub default_timeout_ms: Option<u64>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_stale_age_secs: 120,
            default_reload_interval_ms: 60_000,
            min_reload_interval_ms: 1_000,
            default_retry: 0,
            default_timeout_ms: Some(30_000),
        }
    }
}

impl FetchConfig {
    pub fn max_stale_age(&self) -> Duration {
        Duration::from_secs(self.max_stale_age_secs)
    }

    pub fn default_reload_interval(&self) -> Duration {
        Duration::from_millis(self.default_reload_interval_ms)
    }

    pub fn min_reload_interval(&self) -> Duration {
        Duration::from_millis(self.min_reload_interval_ms)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}
