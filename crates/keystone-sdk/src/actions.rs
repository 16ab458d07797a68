use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use keystone_types::Node;

use crate::keystore::KeyStore;

/// The future an action resolves with.
pub type ActionFuture = BoxFuture<'static, anyhow::Result<Node>>;

/// A named asynchronous operation invoked with the store and the caller's
/// arguments.
pub type ActionFn = Arc<dyn Fn(KeyStore, Vec<Node>) -> ActionFuture + Send + Sync>;

/// Wrap an async closure as an [`ActionFn`].
///
/// ```rust
/// use keystone_sdk::{action, KeyStore, Node};
///
/// let double = action(|_store: KeyStore, args: Vec<Node>| async move {
///     let n = args.first().and_then(Node::as_u64).unwrap_or(0);
///     anyhow::Ok(Node::from(n * 2))
/// });
/// # let _ = double;
/// ```
pub fn action<F, Fut>(f: F) -> ActionFn
where
    F: Fn(KeyStore, Vec<Node>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Node>> + Send + 'static,
{
    Arc::new(move |store, args| Box::pin(f(store, args)))
}

/// Name to action bindings.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, ActionFn>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `action` to `name`, replacing any previous binding. Returns
    /// `true` if one was replaced.
    pub fn register(&mut self, name: impl Into<String>, action: ActionFn) -> bool {
        self.actions.insert(name.into(), action).is_some()
    }

    /// Remove the binding for `name`. Returns whether one existed.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.actions.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<ActionFn> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}
