use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::document::DocumentId;

/// One async mutex per document id.
///
/// Autosave writes and queue drains for the same document both acquire this
/// before touching the remote store and release it once the write settles.
/// Different documents never contend.
#[derive(Clone, Default)]
pub struct DocumentLocks {
    locks: Arc<DashMap<DocumentId, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: &DocumentId) -> Arc<Mutex<()>> {
        self.locks.entry(id.clone()).or_default().clone()
    }

    fn guard(&self, id: &DocumentId, guard: OwnedMutexGuard<()>) -> DocumentGuard {
        DocumentGuard {
            guard: Some(guard),
            id: id.clone(),
            locks: self.locks.clone(),
        }
    }

    pub async fn acquire(&self, id: &DocumentId) -> DocumentGuard {
        let guard = self.lock_for(id).lock_owned().await;
        self.guard(id, guard)
    }

    pub fn try_acquire(&self, id: &DocumentId) -> Option<DocumentGuard> {
        let guard = self.lock_for(id).try_lock_owned().ok()?;
        Some(self.guard(id, guard))
    }

    pub fn is_locked(&self, id: &DocumentId) -> bool {
        self.locks
            .get(id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of documents with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held while a document is being written. Releasing the last holder drops
/// the document's entry from the map.
pub struct DocumentGuard {
    guard: Option<OwnedMutexGuard<()>>,
    id: DocumentId,
    locks: Arc<DashMap<DocumentId, Arc<Mutex<()>>>>,
}

impl Drop for DocumentGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so only an idle entry has a count of 1.
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
