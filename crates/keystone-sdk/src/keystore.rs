use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::join_all;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, info};

use keystone_fetch::{
    FetchCache, FetchOptions, FetchRequest, FetchResponse, RetryingTransport, Transport,
};
use keystone_gate::{run, Call, GateError, Handler, HandlerContext, HandlerEntry, HandlerPipeline};
use keystone_store::{GetOptions, SetOptions, SharedStore, Store};
use keystone_types::{unreference, Clock, KeyPath, Node, SystemClock, EXPIRY_KEY, REF_MARKER};

use crate::actions::{action, ActionFn, ActionRegistry};
use crate::config::KeyStoreConfig;
use crate::error::{SdkError, SdkResult};

// ---------------------------------------------------------------------------
// KeyStoreOptions
// ---------------------------------------------------------------------------

/// Everything a [`KeyStore`] is built from.
#[derive(Default)]
pub struct KeyStoreOptions {
    pub config: KeyStoreConfig,
    /// Initial tree. Non-composite seeds are replaced by an empty mapping.
    pub data: Option<Node>,
    /// Handlers registered before the store is handed out.
    pub handlers: Vec<HandlerEntry>,
    /// Required when `config.is_fetchable` is set. Wrapped in a
    /// [`RetryingTransport`] so `retry`, `timeout`, and abort apply.
    pub transport: Option<Arc<dyn Transport>>,
    /// Defaults to the system clock.
    pub clock: Option<Arc<dyn Clock>>,
}

impl KeyStoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: KeyStoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn data(mut self, data: impl Into<Node>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn handler(mut self, pattern: Option<&str>, handler: Handler) -> Self {
        self.handlers.push((pattern.map(str::to_string), handler));
        self
    }

    pub fn handlers(mut self, batch: impl IntoIterator<Item = HandlerEntry>) -> Self {
        self.handlers.extend(batch);
        self
    }

    /// Make the store fetchable through `transport`.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self.config.is_fetchable = true;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> SdkResult<KeyStore> {
        KeyStore::new(self)
    }
}

// ---------------------------------------------------------------------------
// KeyStore
// ---------------------------------------------------------------------------

/// The public face of a Keystone store.
///
/// Every `get`, `set`, `remove`, `fetch`, and `trigger` call is first
/// wrapped in a [`HandlerContext`] and passed through the registered
/// handlers; the operation then runs with whatever arguments the handlers
/// left in place, unless one of them responded.
///
/// Clones share one store, one pipeline, and one action registry.
#[derive(Clone)]
pub struct KeyStore {
    inner: Arc<Inner>,
}

struct Inner {
    store: SharedStore,
    pipeline: RwLock<HandlerPipeline>,
    actions: RwLock<ActionRegistry>,
    fetch: Option<FetchCache>,
    config: KeyStoreConfig,
    destroyed: AtomicBool,
}

impl KeyStore {
    /// Reference marker prefix used at the JSON boundary.
    pub const REF_MARKER: &'static str = REF_MARKER;
    /// Reserved child key holding expiry records of fetched entries.
    pub const EXPIRY_KEY: &'static str = EXPIRY_KEY;

    pub fn new(options: KeyStoreOptions) -> SdkResult<Self> {
        let KeyStoreOptions {
            config,
            data,
            handlers,
            transport,
            clock,
        } = options;

        let store = match data {
            Some(data) => Store::with_data(data, config.store.clone()),
            None => Store::new(config.store.clone()),
        };
        let store = SharedStore::new(store);

        let fetch = match (config.is_fetchable, transport) {
            (true, Some(transport)) => Some(FetchCache::new(
                store.clone(),
                Arc::new(RetryingTransport::new(transport)),
                clock.unwrap_or_else(|| Arc::new(SystemClock)),
                config.fetch.clone(),
            )),
            (true, None) => {
                return Err(SdkError::Config(
                    "a fetchable store needs a transport".to_string(),
                ))
            }
            (false, _) => None,
        };

        let mut pipeline = HandlerPipeline::new();
        pipeline.use_handlers(handlers);

        info!(
            fetchable = fetch.is_some(),
            immutable = config.store.immutable,
            handlers = pipeline.len(),
            "key store created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                pipeline: RwLock::new(pipeline),
                actions: RwLock::new(ActionRegistry::new()),
                fetch,
                config,
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    /// A plain, non-fetchable store seeded with `data`.
    pub fn with_data(data: impl Into<Node>) -> Self {
        let store = SharedStore::new(Store::with_data(data.into(), Default::default()));
        Self::from_parts(store, KeyStoreConfig::default())
    }

    fn from_parts(store: SharedStore, config: KeyStoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                pipeline: RwLock::new(HandlerPipeline::new()),
                actions: RwLock::new(ActionRegistry::new()),
                fetch: None,
                config,
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn builder() -> KeyStoreOptions {
        KeyStoreOptions::new()
    }

    // ---- Accessors ----

    /// The underlying store, bypassing handlers.
    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    pub fn config(&self) -> &KeyStoreConfig {
        &self.inner.config
    }

    pub fn is_fetchable(&self) -> bool {
        self.inner.fetch.is_some()
    }

    pub fn fetch_cache(&self) -> Option<&FetchCache> {
        self.inner.fetch.as_ref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub fn is_writeable(&self) -> SdkResult<bool> {
        Ok(self.inner.store.read()?.is_writeable())
    }

    // ---- Reads ----

    /// Read `path` (the whole tree when `None`) through the handlers.
    pub fn get(&self, path: Option<&str>, options: GetOptions) -> SdkResult<Option<Node>> {
        if self.is_destroyed() {
            return Ok(None);
        }
        let (call, response) = self.intercept(Call::get(path, options));
        if let Some(response) = response {
            return Ok(Some(response));
        }
        match call {
            Call::Get(call) => Ok(self
                .inner
                .store
                .read()?
                .get(call.path.as_deref(), &call.options)?),
            other => Err(unexpected("get", &other)),
        }
    }

    /// Element-wise [`Self::get`] with default options, preserving order.
    pub fn get_all<S: AsRef<str>>(&self, paths: &[S]) -> SdkResult<Vec<Option<Node>>> {
        paths
            .iter()
            .map(|path| self.get(Some(path.as_ref()), GetOptions::default()))
            .collect()
    }

    // ---- Writes ----

    /// Write `value` at `path` through the handlers. `None` deletes.
    pub fn set(&self, path: &str, value: Option<Node>, options: SetOptions) -> SdkResult<()> {
        let (call, response) = self.intercept(Call::set(path, value, options));
        if response.is_some() {
            return Ok(());
        }
        match call {
            Call::Set(call) => {
                self.inner
                    .store
                    .write()?
                    .set(&call.path, call.value, &call.options)?;
                Ok(())
            }
            other => Err(unexpected("set", &other)),
        }
    }

    /// Apply [`Self::set`] once per entry, in order. A leading separator on
    /// a path is ignored.
    pub fn set_all<I, S>(&self, entries: I, options: SetOptions) -> SdkResult<()>
    where
        I: IntoIterator<Item = (S, Option<Node>)>,
        S: AsRef<str>,
    {
        for (path, value) in entries {
            self.set(path.as_ref().trim_start_matches('/'), value, options)?;
        }
        Ok(())
    }

    /// Remove `path` through the handlers. Absent keys are a no-op.
    pub fn remove(&self, path: &str, options: SetOptions) -> SdkResult<()> {
        let (call, response) = self.intercept(Call::remove(path, options));
        if response.is_some() {
            return Ok(());
        }
        match call {
            Call::Remove(call) => {
                self.inner.store.write()?.remove(&call.path, &call.options)?;
                Ok(())
            }
            other => Err(unexpected("remove", &other)),
        }
    }

    /// Toggle writeability. Either transition discards memoised reads.
    pub fn set_writeable(&self, writeable: bool) -> SdkResult<()> {
        self.inner.store.write()?.set_writeable(writeable);
        Ok(())
    }

    pub fn set_serialisability_of_key(&self, path: &str, serialisable: bool) -> SdkResult<()> {
        self.inner
            .store
            .write()?
            .set_serialisability_of_key(path, serialisable);
        Ok(())
    }

    pub fn set_serialisability_of_keys<I, S>(&self, keys: I) -> SdkResult<()>
    where
        I: IntoIterator<Item = (S, bool)>,
        S: AsRef<str>,
    {
        self.inner.store.write()?.set_serialisability_of_keys(keys);
        Ok(())
    }

    // ---- Fetch ----

    /// Get-or-load `key` from `url` through the handlers.
    pub async fn fetch(
        &self,
        key: &str,
        url: &str,
        options: FetchOptions,
    ) -> SdkResult<FetchResponse> {
        let cache = self.inner.fetch.as_ref().ok_or(SdkError::NotFetchable)?;
        let (call, response) = self.intercept(Call::fetch(key, url, options));
        if let Some(response) = response {
            return Ok(FetchResponse::cached(Some(response)));
        }
        match call {
            Call::Fetch(call) => Ok(cache.fetch(&call.key, &call.url, call.options).await?),
            other => Err(unexpected("fetch", &other)),
        }
    }

    /// [`Self::fetch`] every request concurrently; results keep input order.
    pub async fn fetch_all(&self, requests: Vec<FetchRequest>) -> Vec<SdkResult<FetchResponse>> {
        join_all(requests.into_iter().map(|request| async move {
            self.fetch(&request.key, &request.url, request.options).await
        }))
        .await
    }

    /// Abort every in-flight load. A no-op on a non-fetchable store.
    pub fn abort_all(&self) {
        if let Some(cache) = &self.inner.fetch {
            cache.abort_all();
        }
    }

    // ---- Actions ----

    /// Bind `action` to `name`, replacing any previous binding.
    pub fn register_action(&self, name: &str, action: ActionFn) {
        if self.actions_mut().register(name, action) {
            debug!(name, "action replaced");
        }
    }

    /// Bind an async closure to `name`.
    pub fn register_action_fn<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn(KeyStore, Vec<Node>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Node>> + Send + 'static,
    {
        self.register_action(name, action(f));
    }

    pub fn unregister_action(&self, name: &str) -> bool {
        self.actions_mut().unregister(name)
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions().contains(name)
    }

    /// Run the action bound to `name` with `args`, through the handlers.
    pub async fn trigger(&self, name: &str, args: Vec<Node>) -> SdkResult<Node> {
        let (call, response) = self.intercept(Call::trigger(name, args));
        if let Some(response) = response {
            return Ok(response);
        }
        let call = match call {
            Call::Trigger(call) => call,
            other => return Err(unexpected("trigger", &other)),
        };
        let bound = self.actions().get(&call.name);
        let Some(run_action) = bound else {
            return Err(SdkError::ActionNotRegistered { name: call.name });
        };
        debug!(name = %call.name, args = call.args.len(), "triggering action");
        run_action(self.clone(), call.args)
            .await
            .map_err(|e| SdkError::ActionFailed {
                name: call.name,
                reason: format!("{e:#}"),
            })
    }

    // ---- Handlers ----

    /// Register `handler`, scoped to keys matching `pattern` when given.
    /// Invalid patterns are dropped.
    pub fn use_handler(&self, pattern: Option<&str>, handler: Handler) -> bool {
        self.pipeline_mut().use_handler(pattern, handler)
    }

    pub fn try_use_handler(
        &self,
        pattern: Option<&str>,
        handler: Handler,
    ) -> Result<(), GateError> {
        self.pipeline_mut().try_use_handler(pattern, handler)
    }

    /// Register a batch of handlers together.
    pub fn use_handlers(&self, batch: impl IntoIterator<Item = HandlerEntry>) -> usize {
        self.pipeline_mut().use_handlers(batch)
    }

    pub fn unuse_handler(&self, handler: &Handler) -> bool {
        self.pipeline_mut().unuse_handler(handler)
    }

    pub fn unuse_handlers<'a>(&self, batch: impl IntoIterator<Item = &'a Handler>) -> usize {
        self.pipeline_mut().unuse_handlers(batch)
    }

    // ---- References ----

    pub fn resolve_ref_key(&self, path: &str) -> SdkResult<KeyPath> {
        Ok(self.inner.store.read()?.resolve_ref_key(path)?)
    }

    pub fn resolve_ref_keys<S: AsRef<str>>(&self, paths: &[S]) -> SdkResult<Vec<KeyPath>> {
        Ok(self.inner.store.read()?.resolve_ref_keys(paths)?)
    }

    /// A reference to `path`, or the alias stored there.
    pub fn reference(&self, path: &str) -> SdkResult<Node> {
        Ok(self.inner.store.read()?.reference(path)?)
    }

    pub fn references<S: AsRef<str>>(&self, paths: &[S]) -> SdkResult<Vec<Node>> {
        Ok(self.inner.store.read()?.references(paths)?)
    }

    pub fn unreference(path: &str) -> String {
        unreference(path)
    }

    // ---- Serialization ----

    /// Fully resolved snapshot ignoring serialisability marks.
    pub fn dump(&self) -> SdkResult<Value> {
        Ok(self.inner.store.read()?.dump()?)
    }

    pub fn dump_string(&self) -> SdkResult<String> {
        Ok(self.inner.store.read()?.dump_string()?)
    }

    /// Snapshot honouring serialisability marks.
    pub fn to_json(&self, path: Option<&str>) -> SdkResult<Value> {
        Ok(self.inner.store.read()?.to_json(path)?)
    }

    // ---- Lifecycle ----

    /// Stop background work, drop data, handlers, and actions. Reads return
    /// `None` and other operations fail from now on.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(cache) = &self.inner.fetch {
            cache.destroy();
        }
        match self.inner.store.write() {
            Ok(mut store) => store.destroy(),
            Err(err) => tracing::warn!(error = %err, "store lock poisoned during destroy"),
        }
        self.pipeline_mut().clear();
        self.actions_mut().clear();
        info!("key store destroyed");
    }

    // ---- Internals ----

    /// Run the handlers matching `call` and return the edited call with any
    /// response a handler gave.
    fn intercept(&self, call: Call) -> (Call, Option<Node>) {
        if self.pipeline().is_empty() {
            return (call, None);
        }
        let key = self.handler_key(&call);
        let handlers = self.pipeline().matching(&key);
        if handlers.is_empty() {
            return (call, None);
        }
        let mut context = HandlerContext::new(self.inner.store.clone(), call, key);
        let ran = run(&handlers, &mut context);
        debug!(method = %context.method(), key = context.key(), ran, "handlers ran");
        context.into_parts()
    }

    /// Patterns see the canonical path, or the action name for `trigger`.
    fn handler_key(&self, call: &Call) -> String {
        let target = call.target();
        if matches!(call, Call::Trigger(_)) {
            return target.to_string();
        }
        self.inner
            .store
            .read()
            .ok()
            .and_then(|store| store.resolve_ref_key(target).ok())
            .map(|path| path.to_string())
            .unwrap_or_else(|| target.to_string())
    }

    fn pipeline(&self) -> RwLockReadGuard<'_, HandlerPipeline> {
        self.inner
            .pipeline
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn pipeline_mut(&self) -> RwLockWriteGuard<'_, HandlerPipeline> {
        self.inner
            .pipeline
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn actions(&self) -> RwLockReadGuard<'_, ActionRegistry> {
        self.inner
            .actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn actions_mut(&self) -> RwLockWriteGuard<'_, ActionRegistry> {
        self.inner
            .actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn unexpected(expected: &'static str, found: &Call) -> SdkError {
    SdkError::UnexpectedCall {
        expected,
        found: found.method().as_str(),
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::from_parts(SharedStore::new(Store::default()), KeyStoreConfig::default())
    }
}

impl Serialize for KeyStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json(None)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("fetchable", &self.is_fetchable())
            .field("handlers", &self.pipeline().len())
            .field("actions", &self.actions().names())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
