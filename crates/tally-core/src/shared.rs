//! Thread-safe handle to a [`RecordStore`].
//!
//! Readers run concurrently; a writer holds the lock only while one put or
//! batch is applied, so queries never observe a half-updated index.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::store::RecordStore;

#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<RwLock<RecordStore>>,
}

impl SharedStore {
    pub fn new(store: RecordStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    /// Acquires shared read access. Poisoning is ignored.
    pub fn read(&self) -> RwLockReadGuard<'_, RecordStore> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, RecordStore> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<RecordStore> for SharedStore {
    fn from(store: RecordStore) -> Self {
        Self::new(store)
    }
}
