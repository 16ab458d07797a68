use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::debug;

/// Background work owned by one fetch cache.
///
/// Keyed timers drive recurring reloads: scheduling a key again replaces
/// (and aborts) its previous timer. Unkeyed background loads, such as a
/// stale-while-revalidate refresh, are tracked so [`ReloadRegistry::shutdown`]
/// can abort them too. After shutdown nothing new is spawned.
#[derive(Debug, Default)]
pub struct ReloadRegistry {
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ReloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` as the reload timer for `key`, aborting any timer already
    /// registered under it. Returns `false` once shut down.
    pub fn schedule<F>(&self, key: &str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            return false;
        }
        let handle = tokio::spawn(task);
        if let Some(previous) = lock(&self.timers).insert(key.to_string(), handle) {
            previous.abort();
            debug!(key, "replaced reload timer");
        }
        true
    }

    /// Run `task` in the background, untied to any key.
    pub fn spawn_background<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            return false;
        }
        let mut background = lock(&self.background);
        background.retain(|handle| !handle.is_finished());
        background.push(tokio::spawn(task));
        true
    }

    /// Abort the reload timer for `key`, if any.
    pub fn cancel(&self, key: &str) -> bool {
        match lock(&self.timers).remove(key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        lock(&self.timers)
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of live reload timers.
    pub fn scheduled_count(&self) -> usize {
        lock(&self.timers)
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Abort everything and refuse further work.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let timers: Vec<_> = lock(&self.timers).drain().collect();
        let background: Vec<_> = lock(&self.background).drain(..).collect();
        let count = timers.len() + background.len();
        for (_, handle) in timers {
            handle.abort();
        }
        for handle in background {
            handle.abort();
        }
        debug!(count, "reload registry shut down");
    }
}

impl Drop for ReloadRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
