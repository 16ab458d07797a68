//! Expiry-driven fetch cache for Keystone.
//!
//! A [`FetchCache`] sits on top of a [`SharedStore`](keystone_store::SharedStore)
//! and turns `fetch(key, url, options)` into get-or-load:
//!
//! - fresh entries (a future `expires`, or no record at all) are served
//!   from the store without a load;
//! - stale or missing entries are loaded through a [`Transport`], stored,
//!   and stamped with an [`ExpiryRecord`](keystone_types::ExpiryRecord)
//!   derived from `cache-control`;
//! - failed loads fall back to the previous value while its error-grace
//!   window lasts, advertising at most [`FetchConfig::max_stale_age`];
//! - `reload` keeps an entry fresh with a recurring background load,
//!   `stale_while_revalidate` answers with the stale value while loading.
//!
//! Cancellation is explicit: [`FetchCache::abort_all`] and per-call
//! [`AbortSignal`]s make in-flight loads fail with
//! [`FetchError::Aborted`]. Background work is owned by the cache and
//! stopped by [`FetchCache::destroy`].

pub mod abort;
pub mod cache;
pub mod config;
pub mod error;
pub mod reload;
pub mod transport;
pub mod types;

pub use abort::{AbortHandle, AbortSignal};
pub use cache::FetchCache;
pub use config::FetchConfig;
pub use error::{FetchError, FetchResult};
pub use reload::ReloadRegistry;
pub use transport::{
    RetryingTransport, Transport, TransportError, TransportRequest, TransportResponse,
};
pub use types::{FetchFailure, FetchOptions, FetchRequest, FetchResponse, Headers, HttpMethod};
