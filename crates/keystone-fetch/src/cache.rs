use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, info, warn};

use keystone_store::{GetOptions, SetOptions, SharedStore};
use keystone_types::{Clock, ExpiryRecord, KeyPath, Node, EXPIRY_KEY};

use crate::abort::{AbortHandle, AbortSignal};
use crate::config::FetchConfig;
use crate::error::{FetchError, FetchResult};
use crate::reload::ReloadRegistry;
use crate::transport::{Transport, TransportError, TransportRequest};
use crate::types::{FetchFailure, FetchOptions, FetchRequest, FetchResponse, Headers};

/// Get-or-load cache over a [`SharedStore`].
///
/// Every fetched key carries an optional [`ExpiryRecord`]. A key with a
/// value and no record, or a record whose `expires` lies in the future, is
/// fresh and served without touching the transport. Anything else is
/// loaded; failed loads fall back to the previous value while its
/// error-grace window lasts.
///
/// Clones share one cache. Background reload timers hold only a weak
/// reference, so dropping the last clone stops them.
#[derive(Clone)]
pub struct FetchCache {
    inner: Arc<FetchInner>,
}

struct FetchInner {
    store: SharedStore,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    config: FetchConfig,
    reloads: ReloadRegistry,
    global_abort: Mutex<AbortHandle>,
    /// Records of values that cannot hold an `__expiry` child.
    side_records: Mutex<HashMap<KeyPath, ExpiryRecord>>,
    destroyed: AtomicBool,
}

/// The value currently stored under a key, with its freshness.
struct Cached {
    value: Node,
    record: Option<ExpiryRecord>,
}

impl Cached {
    fn is_fresh(&self, now_ms: u64) -> bool {
        self.record.map_or(true, |record| record.is_fresh(now_ms))
    }
}

enum LoadOutcome {
    Loaded {
        response: FetchResponse,
        interval: Duration,
    },
    Failed(TransportError),
}

impl FetchCache {
    pub fn new(
        store: SharedStore,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: FetchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(FetchInner {
                store,
                transport,
                clock,
                config,
                reloads: ReloadRegistry::new(),
                global_abort: Mutex::new(AbortHandle::new()),
                side_records: Mutex::new(HashMap::new()),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    pub fn config(&self) -> &FetchConfig {
        &self.inner.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Serve `key` from the store while fresh, otherwise load it from `url`.
    ///
    /// A missing key or URL resolves with status 400 without a load. Load
    /// failures resolve with the failure status (or a stale value inside its
    /// error-grace window) unless `reject_on_error` is set. Aborted loads
    /// always fail with [`FetchError::Aborted`].
    pub async fn fetch(
        &self,
        key: &str,
        url: &str,
        options: FetchOptions,
    ) -> FetchResult<FetchResponse> {
        if self.is_destroyed() {
            return Err(FetchError::Destroyed);
        }
        if key.trim().is_empty() || url.trim().is_empty() {
            debug!(key, url, "fetch without key or url");
            return Ok(FetchResponse::bad_request());
        }
        let canonical = self.inner.store.read()?.resolve_ref_key(key)?;
        if canonical.is_root() {
            return Ok(FetchResponse::bad_request());
        }

        let cached = self.inner.cached(&canonical)?;
        let now = self.inner.clock.now_ms();

        if let Some(entry) = cached.as_ref().filter(|entry| entry.is_fresh(now)) {
            if options.reload {
                let first = entry.record.map(|record| record.fresh_remaining(now));
                self.schedule_reload(&canonical, url, &options, first);
            }
            debug!(key = %canonical, "serving fresh entry");
            return Ok(FetchResponse::cached(Some(entry.value.clone())));
        }

        if let Some(entry) = cached.as_ref().filter(|_| options.stale_while_revalidate) {
            let stale = entry.value.clone();
            let this = self.clone();
            let (path, url, options) = (canonical.clone(), url.to_string(), options.clone());
            self.inner.reloads.spawn_background(async move {
                if let Err(err) = this.settle(&path, &url, &options, None).await {
                    warn!(key = %path, %url, error = %err, "background revalidation failed");
                }
            });
            debug!(key = %canonical, "serving stale entry while revalidating");
            return Ok(FetchResponse::cached(Some(stale)));
        }

        self.settle(&canonical, url, &options, cached).await
    }

    /// Run [`Self::fetch`] for every request concurrently. Results keep the
    /// order of `requests`.
    pub async fn fetch_all(&self, requests: Vec<FetchRequest>) -> Vec<FetchResult<FetchResponse>> {
        join_all(
            requests
                .into_iter()
                .map(|request| async move {
                    self.fetch(&request.key, &request.url, request.options).await
                }),
        )
        .await
    }

    /// Abort every load in flight. Loads started afterwards are unaffected.
    pub fn abort_all(&self) {
        let mut handle = lock(&self.inner.global_abort);
        handle.abort();
        *handle = AbortHandle::new();
        info!("aborted all in-flight loads");
    }

    /// The expiry record stored for `key`, if any.
    pub fn expiry_record(&self, key: &str) -> FetchResult<Option<ExpiryRecord>> {
        let canonical = self.inner.store.read()?.resolve_ref_key(key)?;
        Ok(self.inner.cached(&canonical)?.and_then(|entry| entry.record))
    }

    /// Whether a recurring reload is scheduled for `key`.
    pub fn is_reload_scheduled(&self, key: &str) -> bool {
        let canonical = self
            .inner
            .store
            .read()
            .ok()
            .and_then(|store| store.resolve_ref_key(key).ok());
        canonical.is_some_and(|path| self.inner.reloads.is_scheduled(&path.to_string()))
    }

    /// Number of recurring reloads currently scheduled.
    pub fn scheduled_reloads(&self) -> usize {
        self.inner.reloads.scheduled_count()
    }

    /// Cancel the recurring reload of `key`.
    pub fn cancel_reload(&self, key: &str) -> bool {
        match self.inner.store.read().ok().and_then(|s| s.resolve_ref_key(key).ok()) {
            Some(path) => self.inner.reloads.cancel(&path.to_string()),
            None => false,
        }
    }

    /// Abort in-flight loads, stop all background work, and refuse further
    /// fetches. The backing store is left to its owner.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.inner.global_abort).abort();
        self.inner.reloads.shutdown();
        lock(&self.inner.side_records).clear();
        info!("fetch cache destroyed");
    }

    /// Load and turn the outcome into a response, scheduling reloads and
    /// applying the stale-if-error fallback.
    async fn settle(
        &self,
        canonical: &KeyPath,
        url: &str,
        options: &FetchOptions,
        previous: Option<Cached>,
    ) -> FetchResult<FetchResponse> {
        match self.load(canonical, url, options).await? {
            LoadOutcome::Loaded { response, interval } => {
                if options.reload {
                    self.schedule_reload(canonical, url, options, Some(interval));
                }
                Ok(response)
            }
            LoadOutcome::Failed(error) => {
                let status = error.status();
                if status >= 500 && options.reload {
                    self.schedule_reload(canonical, url, options, None);
                }
                if options.reject_on_error {
                    return Err(FetchError::from_status(status, url, error.to_string()));
                }
                Ok(self.fallback(previous, options, status, &error))
            }
        }
    }

    async fn load(
        &self,
        canonical: &KeyPath,
        url: &str,
        options: &FetchOptions,
    ) -> FetchResult<LoadOutcome> {
        let global = lock(&self.inner.global_abort).signal();
        let local = options.abort.clone().unwrap_or_else(AbortSignal::never);
        let config = &self.inner.config;
        let request = TransportRequest {
            method: options.method,
            url: url.to_string(),
            retry: options.retry.unwrap_or(config.default_retry),
            timeout: options.timeout().or_else(|| config.default_timeout()),
            abort: options.abort.clone().unwrap_or_else(|| global.clone()),
        };

        debug!(key = %canonical, url, method = %options.method, "loading");
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = global.aborted() => Err(TransportError::Aborted),
            _ = local.aborted() => Err(TransportError::Aborted),
            outcome = self.inner.transport.request(request) => outcome,
        };

        // Abort wins even when the load completed in the same instant.
        if global.is_aborted()
            || local.is_aborted()
            || matches!(outcome, Err(TransportError::Aborted))
        {
            debug!(key = %canonical, url, "load aborted");
            return Err(FetchError::Aborted {
                url: url.to_string(),
            });
        }
        if self.is_destroyed() {
            return Err(FetchError::Destroyed);
        }

        let response = match outcome {
            Ok(response) if response.status < 400 => response,
            Ok(response) => {
                return Ok(LoadOutcome::Failed(TransportError::Status {
                    status: response.status,
                    message: format!("request failed with status {}", response.status),
                }))
            }
            Err(error) => {
                debug!(key = %canonical, url, %error, "load failed");
                return Ok(LoadOutcome::Failed(error));
            }
        };

        let mut headers = response.headers;
        headers.status = response.status;
        let data = self.inner.commit(canonical, response.body, &headers)?;
        let interval = headers
            .max_age()
            .unwrap_or_else(|| config.default_reload_interval());

        Ok(LoadOutcome::Loaded {
            response: FetchResponse {
                duration: started.elapsed(),
                headers,
                data,
                error: None,
            },
            interval,
        })
    }

    fn fallback(
        &self,
        previous: Option<Cached>,
        options: &FetchOptions,
        status: u16,
        error: &TransportError,
    ) -> FetchResponse {
        let failure = FetchFailure {
            status,
            message: error.to_string(),
        };
        let now = self.inner.clock.now_ms();

        if options.stale_if_error {
            if let Some(entry) = previous {
                if let Some(grace) = entry.record.and_then(|r| r.error_grace_remaining(now)) {
                    let max_age = grace.min(self.inner.config.max_stale_age());
                    debug!(
                        status,
                        max_age_secs = max_age.as_secs(),
                        "serving stale value after failure"
                    );
                    return FetchResponse {
                        duration: Duration::ZERO,
                        headers: Headers::status(200).with_max_age(max_age),
                        data: Some(entry.value),
                        error: Some(failure),
                    };
                }
            }
        }

        FetchResponse {
            duration: Duration::ZERO,
            headers: Headers::status(status),
            data: None,
            error: Some(failure),
        }
    }

    /// Keep `canonical` fresh with a recurring reload. The first reload runs
    /// after `first` (or the default interval), later ones after the
    /// freshness each load advertises.
    fn schedule_reload(
        &self,
        canonical: &KeyPath,
        url: &str,
        options: &FetchOptions,
        first: Option<Duration>,
    ) {
        let floor = self.inner.config.min_reload_interval();
        let default = self.inner.config.default_reload_interval();
        let weak: Weak<FetchInner> = Arc::downgrade(&self.inner);
        let path = canonical.clone();
        let url = url.to_string();
        let options = FetchOptions {
            reload: false,
            stale_while_revalidate: false,
            reject_on_error: false,
            abort: None,
            ..options.clone()
        };

        let first = first.unwrap_or(default).max(floor);
        let scheduled = self.inner.reloads.schedule(&canonical.to_string(), async move {
            let mut delay = first;
            loop {
                tokio::time::sleep(delay).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let cache = FetchCache { inner };
                delay = match cache.load(&path, &url, &options).await {
                    Ok(LoadOutcome::Loaded { interval, .. }) => interval,
                    Ok(LoadOutcome::Failed(error)) => {
                        warn!(key = %path, %url, %error, "background reload failed");
                        default
                    }
                    Err(FetchError::Destroyed) => break,
                    Err(error) => {
                        warn!(key = %path, %url, %error, "background reload failed");
                        default
                    }
                }
                .max(floor);
            }
        });
        if scheduled {
            debug!(key = %canonical, delay_ms = first.as_millis() as u64, "scheduled reload");
        }
    }
}

impl FetchInner {
    /// The value at `canonical` with its expiry record.
    fn cached(&self, canonical: &KeyPath) -> FetchResult<Option<Cached>> {
        let store = self.store.read()?;
        let Some(value) = store.get(Some(&canonical.to_string()), &GetOptions::default())? else {
            return Ok(None);
        };
        let record = store
            .root()
            .get_path(&canonical.child(EXPIRY_KEY))
            .and_then(ExpiryRecord::from_node)
            .or_else(|| lock(&self.side_records).get(canonical).copied());
        Ok(Some(Cached {
            value: strip_expiry(value),
            record,
        }))
    }

    /// Store a loaded body and its record; returns the stored value as a
    /// reader would see it.
    fn commit(
        &self,
        canonical: &KeyPath,
        body: Node,
        headers: &Headers,
    ) -> FetchResult<Option<Node>> {
        let now = self.clock.now_ms();
        let record = headers.max_age().map(|max_age| {
            ExpiryRecord::from_freshness(now, max_age, headers.stale_if_error().unwrap_or_default())
        });
        let path = canonical.to_string();

        let mut store = self.store.write()?;
        let mut side = lock(&self.side_records);
        let in_tree = matches!(body, Node::Mapping(_)) && record.is_some();
        let body = match (body, record) {
            (Node::Mapping(mut map), Some(record)) => {
                Arc::make_mut(&mut map).insert(EXPIRY_KEY.to_string(), record.to_node());
                side.remove(canonical);
                Node::Mapping(map)
            }
            (body, Some(record)) => {
                side.insert(canonical.clone(), record);
                body
            }
            (body, None) => {
                side.remove(canonical);
                body
            }
        };
        drop(side);

        store.set(&path, Some(body), &SetOptions::default())?;
        if in_tree {
            store.set_serialisability_of_key(&canonical.child(EXPIRY_KEY).to_string(), false);
        }
        debug!(key = %path, expires = ?record.map(|r| r.expires), "stored load");
        Ok(store.get(Some(&path), &GetOptions::default())?.map(strip_expiry))
    }
}

/// Drop the `__expiry` child a cached mapping carries.
fn strip_expiry(value: Node) -> Node {
    match value {
        Node::Mapping(mut map) if map.contains_key(EXPIRY_KEY) => {
            Arc::make_mut(&mut map).remove(EXPIRY_KEY);
            Node::Mapping(map)
        }
        other => other,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for FetchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCache")
            .field("config", &self.inner.config)
            .field("scheduled_reloads", &self.inner.reloads.scheduled_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use keystone_store::{Store, StoreConfig};
    use keystone_types::ManualClock;
    use serde_json::{json, Value};

    use crate::transport::TransportResponse;

    const NOW: u64 = 1_700_000_000_000;

    type Reply = Result<TransportResponse, TransportError>;

    /// Replies per URL in order; the last reply repeats.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<HashMap<String, VecDeque<Reply>>>,
        calls: Mutex<Vec<String>>,
        delay: Mutex<Option<Duration>>,
        abort_on_call: Mutex<Option<Arc<AbortHandle>>>,
    }

    impl Scripted {
        fn reply(&self, url: &str, reply: Reply) {
            self.replies
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(reply);
        }

        fn calls(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn request(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            self.calls.lock().unwrap().push(request.url.clone());
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let abort = self.abort_on_call.lock().unwrap().clone();
            if let Some(handle) = abort {
                handle.abort();
            }
            let mut replies = self.replies.lock().unwrap();
            let queue = replies.entry(request.url).or_default();
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue
                    .front()
                    .cloned()
                    .unwrap_or(Err(TransportError::Network("no scripted reply".into())))
            }
        }
    }

    struct Harness {
        cache: FetchCache,
        transport: Arc<Scripted>,
        clock: Arc<ManualClock>,
        store: SharedStore,
    }

    fn harness(data: Value) -> Harness {
        let store = SharedStore::new(Store::with_data(Node::from(data), StoreConfig::default()));
        let transport = Arc::new(Scripted::default());
        let clock = Arc::new(ManualClock::new(NOW));
        let config = FetchConfig {
            default_reload_interval_ms: 20,
            min_reload_interval_ms: 5,
            ..FetchConfig::default()
        };
        let cache = FetchCache::new(
            store.clone(),
            transport.clone() as Arc<dyn Transport>,
            clock.clone() as Arc<dyn Clock>,
            config,
        );
        Harness {
            cache,
            transport,
            clock,
            store,
        }
    }

    fn json_of(response: &FetchResponse) -> Value {
        response.data.as_ref().map(Node::to_json).unwrap_or(Value::Null)
    }

    fn stored(store: &SharedStore, path: &str) -> Value {
        store
            .read()
            .unwrap()
            .get(Some(path), &GetOptions::default())
            .unwrap()
            .map(|n| n.to_json())
            .unwrap_or(Value::Null)
    }

    fn server_error() -> Reply {
        Err(TransportError::Status {
            status: 503,
            message: "unavailable".into(),
        })
    }

    fn stale_user(expires_if_error: u64) -> Value {
        json!({
            "user": {
                "name": "old",
                "__expiry": { "expires": NOW - 1_000, "expiresIfError": expires_if_error }
            }
        })
    }

    #[tokio::test]
    async fn missing_key_or_url_is_bad_request() {
        let h = harness(json!({}));
        let a = h.cache.fetch("", "http://x", FetchOptions::default()).await.unwrap();
        let b = h.cache.fetch("user", "", FetchOptions::default()).await.unwrap();
        assert_eq!(a.status(), 400);
        assert_eq!(b.status(), 400);
        assert!(a.data.is_none() && b.data.is_none());
        assert_eq!(h.transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn fresh_entry_skips_transport() {
        let h = harness(json!({
            "user": {
                "name": "a",
                "__expiry": { "expires": NOW + 10_000, "expiresIfError": NOW + 20_000 }
            }
        }));
        let response = h.cache.fetch("user", "http://u", FetchOptions::default()).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.duration, Duration::ZERO);
        assert_eq!(json_of(&response), json!({ "name": "a" }));
        assert_eq!(h.transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn entry_without_record_is_permanently_fresh() {
        let h = harness(json!({ "settings": { "theme": "dark" } }));
        h.clock.advance(Duration::from_secs(86_400));
        let response = h
            .cache
            .fetch("settings", "http://s", FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(json_of(&response), json!({ "theme": "dark" }));
        assert_eq!(h.transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn missing_entry_is_loaded_and_recorded() {
        let h = harness(json!({}));
        h.transport.reply(
            "http://u",
            Ok(TransportResponse::ok(json!({ "name": "x" }))
                .with_header("cache-control", "max-age=60, stale-if-error=300")),
        );

        let response = h.cache.fetch("user", "http://u", FetchOptions::default()).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(json_of(&response), json!({ "name": "x" }));
        assert_eq!(response.headers.max_age(), Some(Duration::from_secs(60)));

        let record = h.cache.expiry_record("user").unwrap().unwrap();
        assert_eq!(record.expires, NOW + 60_000);
        assert_eq!(record.expires_if_error, NOW + 360_000);

        let serialised = h.store.read().unwrap().to_json(None).unwrap();
        assert_eq!(serialised, json!({ "user": { "name": "x" } }));
        assert_eq!(h.cache.scheduled_reloads(), 0);
    }

    #[tokio::test]
    async fn stale_entry_is_reloaded_without_scheduling() {
        let h = harness(stale_user(NOW + 60_000));
        h.transport.reply(
            "http://u",
            Ok(TransportResponse::ok(json!({ "name": "new" }))
                .with_max_age(Duration::from_secs(30))),
        );

        let response = h.cache.fetch("user", "http://u", FetchOptions::default()).await.unwrap();
        assert_eq!(json_of(&response), json!({ "name": "new" }));
        assert_eq!(h.transport.calls("http://u"), 1);
        assert!(!h.cache.is_reload_scheduled("user"));

        let again = h.cache.fetch("user", "http://u", FetchOptions::default()).await.unwrap();
        assert_eq!(json_of(&again), json!({ "name": "new" }));
        assert_eq!(h.transport.calls("http://u"), 1);
    }

    #[tokio::test]
    async fn server_failure_within_grace_serves_stale_with_capped_max_age() {
        let h = harness(stale_user(NOW + 500_000));
        h.transport.reply("http://u", server_error());

        let response = h.cache.fetch("user", "http://u", FetchOptions::default()).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(json_of(&response), json!({ "name": "old" }));
        assert_eq!(response.headers.max_age(), Some(Duration::from_secs(120)));
        assert_eq!(response.error.as_ref().map(|e| e.status), Some(503));
        assert_eq!(response.duration, Duration::ZERO);
    }

    #[tokio::test]
    async fn short_grace_is_advertised_as_is() {
        let h = harness(stale_user(NOW + 45_000));
        h.transport.reply("http://u", server_error());

        let response = h.cache.fetch("user", "http://u", FetchOptions::default()).await.unwrap();
        assert_eq!(response.headers.max_age(), Some(Duration::from_secs(45)));
    }

    #[tokio::test]
    async fn server_failure_past_grace_has_no_data() {
        let h = harness(stale_user(NOW - 1));
        h.transport.reply("http://u", server_error());

        let response = h.cache.fetch("user", "http://u", FetchOptions::default()).await.unwrap();
        assert_eq!(response.status(), 503);
        assert!(response.data.is_none());
    }

    #[tokio::test]
    async fn stale_if_error_can_be_disabled() {
        let h = harness(stale_user(NOW + 500_000));
        h.transport.reply("http://u", server_error());
        let options = FetchOptions {
            stale_if_error: false,
            ..FetchOptions::default()
        };

        let response = h.cache.fetch("user", "http://u", options).await.unwrap();
        assert_eq!(response.status(), 503);
        assert!(response.data.is_none());
    }

    #[tokio::test]
    async fn reject_on_error_surfaces_classified_errors() {
        let h = harness(json!({}));
        h.transport.reply("http://down", server_error());
        h.transport.reply(
            "http://missing",
            Err(TransportError::Status {
                status: 404,
                message: "not found".into(),
            }),
        );
        let options = FetchOptions {
            reject_on_error: true,
            ..FetchOptions::default()
        };

        let err = h.cache.fetch("a", "http://down", options.clone()).await.unwrap_err();
        assert!(matches!(err, FetchError::Server { status: 503, .. }));
        let err = h.cache.fetch("b", "http://missing", options).await.unwrap_err();
        assert!(matches!(err, FetchError::Client { status: 404, .. }));
    }

    #[tokio::test]
    async fn error_status_responses_count_as_failures() {
        let h = harness(json!({}));
        h.transport.reply(
            "http://gone",
            Ok(TransportResponse {
                status: 410,
                headers: Headers::status(410),
                body: Node::Null,
            }),
        );
        let response = h.cache.fetch("k", "http://gone", FetchOptions::default()).await.unwrap();
        assert_eq!(response.status(), 410);
        assert!(response.data.is_none());
        assert_eq!(stored(&h.store, "k"), Value::Null);
    }

    #[tokio::test]
    async fn stale_while_revalidate_answers_immediately() {
        let h = harness(stale_user(NOW + 500_000));
        h.transport.reply(
            "http://u",
            Ok(TransportResponse::ok(json!({ "name": "new" }))
                .with_max_age(Duration::from_secs(30))),
        );
        let options = FetchOptions {
            stale_while_revalidate: true,
            ..FetchOptions::default()
        };

        let response = h.cache.fetch("user", "http://u", options).await.unwrap();
        assert_eq!(json_of(&response), json!({ "name": "old" }));

        for _ in 0..200 {
            if stored(&h.store, "user/name") == json!("new") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(stored(&h.store, "user/name"), json!("new"));
        assert_eq!(h.transport.calls("http://u"), 1);
    }

    #[tokio::test]
    async fn reload_keeps_loading_until_destroyed() {
        let h = harness(json!({}));
        h.transport.reply("http://feed", Ok(TransportResponse::ok(json!({ "items": [] }))));
        let options = FetchOptions {
            reload: true,
            ..FetchOptions::default()
        };

        h.cache.fetch("feed", "http://feed", options).await.unwrap();
        assert!(h.cache.is_reload_scheduled("feed"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(h.transport.calls("http://feed") >= 3);

        h.cache.destroy();
        assert_eq!(h.cache.scheduled_reloads(), 0);
        let calls = h.transport.calls("http://feed");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(h.transport.calls("http://feed"), calls);

        let err = h.cache.fetch("feed", "http://feed", FetchOptions::default()).await.unwrap_err();
        assert!(matches!(err, FetchError::Destroyed));
    }

    #[tokio::test]
    async fn failures_schedule_reload_only_for_server_errors() {
        let h = harness(json!({}));
        h.transport.reply("http://down", server_error());
        h.transport.reply(
            "http://missing",
            Err(TransportError::Status {
                status: 404,
                message: "not found".into(),
            }),
        );
        let options = FetchOptions {
            reload: true,
            ..FetchOptions::default()
        };

        h.cache.fetch("a", "http://down", options.clone()).await.unwrap();
        h.cache.fetch("b", "http://missing", options).await.unwrap();
        assert!(h.cache.is_reload_scheduled("a"));
        assert!(!h.cache.is_reload_scheduled("b"));
        assert!(h.cache.cancel_reload("a"));
    }

    #[tokio::test]
    async fn fresh_entry_with_reload_schedules() {
        let h = harness(json!({ "cfg": { "v": 1 } }));
        let options = FetchOptions {
            reload: true,
            ..FetchOptions::default()
        };
        h.cache.fetch("cfg", "http://cfg", options).await.unwrap();
        assert!(h.cache.is_reload_scheduled("cfg"));
        assert_eq!(h.transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn abort_all_rejects_in_flight_loads() {
        let h = harness(json!({}));
        h.transport.set_delay(Duration::from_secs(5));
        h.transport.reply("http://slow", Ok(TransportResponse::ok(1u64)));

        let cache = h.cache.clone();
        let pending = tokio::spawn(async move {
            cache.fetch("slow", "http://slow", FetchOptions::default()).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.cache.abort_all();

        let outcome = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("aborted fetch settles")
            .unwrap();
        assert!(matches!(outcome, Err(FetchError::Aborted { .. })));
        assert_eq!(stored(&h.store, "slow"), Value::Null);

        *h.transport.delay.lock().unwrap() = None;
        let response = h.cache.fetch("slow", "http://slow", FetchOptions::default()).await.unwrap();
        assert_eq!(json_of(&response), json!(1));
    }

    #[tokio::test]
    async fn per_call_abort_rejects_only_that_load() {
        let h = harness(json!({}));
        h.transport.set_delay(Duration::from_millis(200));
        h.transport.reply("http://a", Ok(TransportResponse::ok("a")));
        h.transport.reply("http://b", Ok(TransportResponse::ok("b")));

        let handle = AbortHandle::new();
        let aborted = FetchOptions {
            abort: Some(handle.signal()),
            ..FetchOptions::default()
        };
        let a = h.cache.fetch("a", "http://a", aborted);
        let b = h.cache.fetch("b", "http://b", FetchOptions::default());
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.abort();
        };
        let (a, b, ()) = tokio::join!(a, b, trigger);

        assert!(matches!(a, Err(FetchError::Aborted { .. })));
        assert_eq!(json_of(&b.unwrap()), json!("b"));
    }

    #[tokio::test]
    async fn abort_wins_when_load_completes_concurrently() {
        let h = harness(json!({}));
        h.transport.reply("http://race", Ok(TransportResponse::ok("done")));
        let handle = Arc::new(AbortHandle::new());
        *h.transport.abort_on_call.lock().unwrap() = Some(handle.clone());

        let options = FetchOptions {
            abort: Some(handle.signal()),
            ..FetchOptions::default()
        };
        let outcome = h.cache.fetch("race", "http://race", options).await;
        assert!(matches!(outcome, Err(FetchError::Aborted { .. })));
        assert_eq!(stored(&h.store, "race"), Value::Null);
    }

    #[tokio::test]
    async fn fetch_all_preserves_order() {
        let h = harness(json!({}));
        h.transport.reply("http://1", Ok(TransportResponse::ok("one")));
        h.transport.reply("http://2", Ok(TransportResponse::ok("two")));

        let results = h
            .cache
            .fetch_all(vec![
                FetchRequest::new("one", "http://1", FetchOptions::default()),
                FetchRequest::new("", "http://x", FetchOptions::default()),
                FetchRequest::new("two", "http://2", FetchOptions::default()),
            ])
            .await;

        let statuses: Vec<u16> = results.iter().map(|r| r.as_ref().unwrap().status()).collect();
        assert_eq!(statuses, vec![200, 400, 200]);
        assert_eq!(json_of(results[0].as_ref().unwrap()), json!("one"));
        assert_eq!(json_of(results[2].as_ref().unwrap()), json!("two"));
    }

    #[tokio::test]
    async fn scalar_bodies_keep_records_aside() {
        let h = harness(json!({}));
        h.transport.reply(
            "http://note",
            Ok(TransportResponse::ok("hello").with_max_age(Duration::from_secs(30))),
        );

        h.cache.fetch("note", "http://note", FetchOptions::default()).await.unwrap();
        assert_eq!(stored(&h.store, "note"), json!("hello"));
        assert!(h.cache.expiry_record("note").unwrap().is_some());

        h.cache.fetch("note", "http://note", FetchOptions::default()).await.unwrap();
        assert_eq!(h.transport.calls("http://note"), 1);

        h.clock.advance(Duration::from_secs(31));
        h.cache.fetch("note", "http://note", FetchOptions::default()).await.unwrap();
        assert_eq!(h.transport.calls("http://note"), 2);
    }

    #[tokio::test]
    async fn fetch_writes_through_references() {
        let h = harness(json!({ "alias": "__ref:real", "real": { "stale": true } }));
        let expired = ExpiryRecord {
            expires: 0,
            expires_if_error: 0,
        };
        h.store
            .write()
            .unwrap()
            .set("real/__expiry", Some(expired.to_node()), &SetOptions::default())
            .unwrap();
        h.transport.reply("http://r", Ok(TransportResponse::ok(json!({ "fresh": true }))));

        let response = h.cache.fetch("alias", "http://r", FetchOptions::default()).await.unwrap();
        assert_eq!(json_of(&response), json!({ "fresh": true }));
        assert_eq!(stored(&h.store, "real"), json!({ "fresh": true }));
        let store = h.store.read().unwrap();
        assert!(store.root().child("alias").unwrap().as_reference().is_some());
    }
}
