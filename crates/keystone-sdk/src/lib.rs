//! Keystone SDK: the [`KeyStore`] facade.
//!
//! A `KeyStore` bundles a reference-resolving store, a handler pipeline, an
//! action registry, and (when fetchable) an expiry-driven fetch cache behind
//! one cloneable handle.
//!
//! ```rust
//! use keystone_sdk::{GetOptions, Handler, KeyStore, Node, SetOptions};
//! use serde_json::json;
//!
//! let store = KeyStore::with_data(json!({
//!     "users": { "ada": { "name": "Ada" } },
//!     "me": "__ref:users/ada"
//! }));
//!
//! // Patterns are matched against the resolved path.
//! store.use_handler(Some("^users/.+/name$"), Handler::new(|ctx| {
//!     let upper = ctx.value().and_then(Node::as_str).map(str::to_uppercase);
//!     ctx.set_value(upper.map(Node::from));
//! }));
//!
//! store.set("me/name", Some(Node::from("Ada L.")), SetOptions::default()).unwrap();
//! let me = store.get(Some("me"), GetOptions::default()).unwrap().unwrap();
//! assert_eq!(me.to_json(), json!({ "name": "ADA L." }));
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod keystore;

pub use actions::{action, ActionFn, ActionFuture, ActionRegistry};
pub use config::KeyStoreConfig;
pub use error::{SdkError, SdkResult};
pub use keystore::{KeyStore, KeyStoreOptions};

pub use keystone_fetch::{
    AbortHandle, AbortSignal, FetchConfig, FetchError, FetchOptions, FetchRequest, FetchResponse,
    Transport, TransportError, TransportRequest, TransportResponse,
};
pub use keystone_gate::{Call, GateError, Handler, HandlerContext, HandlerEntry, Method};
pub use keystone_store::{GetOptions, SetOptions, StoreConfig, StoreError};
pub use keystone_types::{Clock, KeyPath, ManualClock, Node, SystemClock};
