//! Wall-clock sources and expiry stamps for cached values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::node::Node;

/// Source of wall-clock milliseconds since the UNIX epoch.
///
/// The fetch cache reads time only through this trait so tests can drive
/// staleness deterministically with a [`ManualClock`].
pub trait Clock: Send + Sync {
    /// Milliseconds since the UNIX epoch.
    fn now_ms(&self) -> u64;
}

/// The system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Freshness bookkeeping stored alongside a cached entry.
///
/// `expires <= now` means stale. Between `expires` and `expires_if_error`
/// the entry may still be served when a reload fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryRecord {
    /// Milliseconds since the UNIX epoch after which the entry is stale.
    pub expires: u64,
    /// Milliseconds since the UNIX epoch after which a stale entry may no
    /// longer stand in for a failed reload.
    pub expires_if_error: u64,
}

impl ExpiryRecord {
    /// Record for a response fetched at `now_ms` that is fresh for `max_age`
    /// and usable on error for a further `stale_if_error`.
    pub fn from_freshness(now_ms: u64, max_age: Duration, stale_if_error: Duration) -> Self {
        let expires = now_ms.saturating_add(max_age.as_millis() as u64);
        Self {
            expires,
            expires_if_error: expires.saturating_add(stale_if_error.as_millis() as u64),
        }
    }

    pub fn is_fresh(&self, now_ms: u64) -> bool {
        self.expires > now_ms
    }

    /// Remaining time during which the entry may be served after a failure.
    pub fn error_grace_remaining(&self, now_ms: u64) -> Option<Duration> {
        (self.expires_if_error > now_ms)
            .then(|| Duration::from_millis(self.expires_if_error - now_ms))
    }

    /// Remaining freshness, zero once stale.
    pub fn fresh_remaining(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.expires.saturating_sub(now_ms))
    }

    pub fn to_node(&self) -> Node {
        Node::mapping([
            ("expires", Node::from(self.expires)),
            ("expiresIfError", Node::from(self.expires_if_error)),
        ])
    }

    /// Parse a record previously written with [`Self::to_node`].
    pub fn from_node(node: &Node) -> Option<Self> {
        Some(Self {
            expires: node.child("expires")?.as_u64()?,
            expires_if_error: node.child("expiresIfError")?.as_u64()?,
        })
    }
}
