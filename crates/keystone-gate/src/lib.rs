//! Handler interception pipeline for Keystone.
//!
//! Every public store operation is described by a typed [`Call`]. Before the
//! operation runs, the call is wrapped in a [`HandlerContext`] and handed to
//! each matching [`Handler`] of a [`HandlerPipeline`], in registration
//! order. Handlers may rewrite arguments, attach extra fields, or answer the
//! call outright with [`HandlerContext::respond`].
//!
//! ```rust
//! use keystone_gate::{Call, Handler, HandlerContext, HandlerPipeline};
//! use keystone_store::{SetOptions, SharedStore, Store};
//! use keystone_types::Node;
//!
//! let mut pipeline = HandlerPipeline::new();
//! pipeline.use_handler(Some("^greeting$"), Handler::new(|ctx| {
//!     ctx.set_value(Some(Node::from("hello")));
//! }));
//!
//! let call = Call::set("greeting", Some(Node::from("hi")), SetOptions::default());
//! let mut ctx = HandlerContext::new(SharedStore::new(Store::default()), call, "greeting");
//! pipeline.dispatch(&mut ctx);
//! assert_eq!(ctx.value(), Some(&Node::from("hello")));
//! ```

pub mod call;
pub mod context;
pub mod error;
pub mod pipeline;

pub use call::{Call, FetchCall, GetCall, Method, RemoveCall, SetCall, TriggerCall};
pub use context::HandlerContext;
pub use error::GateError;
pub use pipeline::{run, Handler, HandlerEntry, HandlerPipeline};
