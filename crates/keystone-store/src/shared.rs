use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{StoreError, StoreResult};
use crate::store::Store;

/// A [`Store`] shared between the public facade, handlers, and background
/// fetch tasks.
///
/// Guards are short-lived: callers take one, perform a synchronous store
/// operation, and drop it before awaiting anything.
#[derive(Clone, Debug)]
pub struct SharedStore {
    inner: Arc<RwLock<Store>>,
}

impl SharedStore {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    /// Acquire shared read access.
    pub fn read(&self) -> StoreResult<RwLockReadGuard<'_, Store>> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Acquire exclusive write access.
    pub fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Store>> {
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Returns `true` if both handles share the same store.
    pub fn ptr_eq(&self, other: &SharedStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<Store> for SharedStore {
    fn from(store: Store) -> Self {
        Self::new(store)
    }
}
