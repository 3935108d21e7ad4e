#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use scriptorium_autosave::{
    AttachmentStore, AutosaveConfig, Connectivity, Content, Credential, Document, DocumentId,
    DraftSnapshot, DraftStore, DraftSummary, MemoryDraftStore, QueueEntry, RemoteDocumentStore,
    RemoteError, StorageError, SyncEngine, TokioScheduler, WritePayload,
};

/// Remote store whose failures are scripted by the test.
#[derive(Default)]
pub struct ScriptedRemote {
    attempts: Mutex<Vec<WritePayload>>,
    documents: Mutex<HashMap<DocumentId, Document>>,
    offline: AtomicBool,
    forbidden: AtomicBool,
    reject_public: AtomicBool,
    fail_titles: Mutex<HashSet<String>>,
    upsert_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRemote {
    pub fn insert(&self, document: Document) {
        self.documents
            .lock()
            .unwrap()
            .insert(document.id.clone(), document);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_forbidden(&self, forbidden: bool) {
        self.forbidden.store(forbidden, Ordering::SeqCst);
    }

    /// Refuse any write that would make a document public.
    pub fn set_reject_public(&self, reject: bool) {
        self.reject_public.store(reject, Ordering::SeqCst);
    }

    pub fn fail_title(&self, title: &str) {
        self.fail_titles.lock().unwrap().insert(title.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_titles.lock().unwrap().clear();
    }

    pub fn set_upsert_delay(&self, delay: Duration) {
        *self.upsert_delay.lock().unwrap() = delay;
    }

    /// Every upsert call, including failed ones.
    pub fn attempts(&self) -> Vec<WritePayload> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempted_titles(&self) -> Vec<String> {
        self.attempts().into_iter().map(|p| p.title).collect()
    }

    pub fn stored(&self, id: &str) -> Option<Document> {
        self.documents
            .lock()
            .unwrap()
            .get(&DocumentId::new(id))
            .cloned()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl RemoteDocumentStore for ScriptedRemote {
    async fn upsert(&self, payload: &WritePayload) -> Result<(), RemoteError> {
        self.attempts.lock().unwrap().push(payload.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.upsert_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::unreachable("network down"));
        }
        if self.forbidden.load(Ordering::SeqCst)
            || (payload.is_public && self.reject_public.load(Ordering::SeqCst))
        {
            return Err(RemoteError::from_status(403, "forbidden"));
        }
        if self.fail_titles.lock().unwrap().contains(&payload.title) {
            return Err(RemoteError::from_status(502, "bad gateway"));
        }
        self.insert(Document::from_payload(payload, Utc::now()));
        Ok(())
    }

    async fn fetch(
        &self,
        id: &DocumentId,
        _credential: &Credential,
    ) -> Result<Option<Document>, RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::unreachable("network down"));
        }
        if self.forbidden.load(Ordering::SeqCst) {
            return Err(RemoteError::Forbidden);
        }
        Ok(self.documents.lock().unwrap().get(id).cloned())
    }
}

#[derive(Default)]
pub struct RecordingAttachments {
    deleted: Mutex<Vec<String>>,
}

impl RecordingAttachments {
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

impl AttachmentStore for RecordingAttachments {
    async fn delete(&self, url: &str) -> Result<(), RemoteError> {
        self.deleted.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Draft store with a slow `load_draft` and switchable save failures.
#[derive(Default)]
pub struct FlakyDrafts {
    pub inner: MemoryDraftStore,
    pub load_delay: Duration,
    pub fail_saves: AtomicBool,
}

impl DraftStore for FlakyDrafts {
    async fn save_draft(&self, id: &DocumentId, snapshot: &DraftSnapshot) -> Result<(), StorageError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::QuotaExceeded);
        }
        self.inner.save_draft(id, snapshot).await
    }

    async fn load_draft(&self, id: &DocumentId) -> Result<Option<DraftSnapshot>, StorageError> {
        tokio::time::sleep(self.load_delay).await;
        self.inner.load_draft(id).await
    }

    async fn append_queue_entry(&self, id: &DocumentId, entry: &QueueEntry) -> Result<(), StorageError> {
        self.inner.append_queue_entry(id, entry).await
    }

    async fn read_queue(&self, id: &DocumentId) -> Result<Vec<QueueEntry>, StorageError> {
        self.inner.read_queue(id).await
    }

    async fn clear_queue(&self, id: &DocumentId) -> Result<(), StorageError> {
        self.inner.clear_queue(id).await
    }

    async fn replace_queue(&self, id: &DocumentId, remaining: &[QueueEntry]) -> Result<(), StorageError> {
        self.inner.replace_queue(id, remaining).await
    }

    async fn list_drafts(&self) -> Result<Vec<DraftSummary>, StorageError> {
        self.inner.list_drafts().await
    }

    async fn queued_documents(&self) -> Result<Vec<DocumentId>, StorageError> {
        self.inner.queued_documents().await
    }

    async fn delete_draft(&self, id: &DocumentId) -> Result<(), StorageError> {
        self.inner.delete_draft(id).await
    }
}

pub struct Harness<D> {
    pub remote: Arc<ScriptedRemote>,
    pub drafts: Arc<D>,
    pub attachments: Arc<RecordingAttachments>,
    pub connectivity: Connectivity,
    pub engine: SyncEngine<ScriptedRemote, D, RecordingAttachments>,
}

impl<D: DraftStore> Harness<D> {
    /// Take the network down for both the remote store and the host signal.
    pub fn go_offline(&self) {
        self.remote.set_offline(true);
        self.connectivity.set_online(false);
    }

    pub fn go_online(&self) {
        self.remote.set_offline(false);
        self.connectivity.set_online(true);
    }
}

pub fn harness() -> Harness<MemoryDraftStore> {
    harness_with(Arc::new(MemoryDraftStore::new()))
}

pub fn harness_with<D: DraftStore>(drafts: Arc<D>) -> Harness<D> {
    harness_with_remote(drafts, Arc::new(ScriptedRemote::default()))
}

pub fn harness_with_remote<D: DraftStore>(drafts: Arc<D>, remote: Arc<ScriptedRemote>) -> Harness<D> {
    let connectivity = Connectivity::new(true);
    let scheduler = TokioScheduler::try_current(connectivity.clone()).unwrap();
    let attachments = Arc::new(RecordingAttachments::default());
    let engine = SyncEngine::new(
        remote.clone(),
        drafts.clone(),
        attachments.clone(),
        Arc::new(scheduler),
        AutosaveConfig::default(),
    );
    Harness {
        remote,
        drafts,
        attachments,
        connectivity,
        engine,
    }
}

pub fn document(id: &str, title: &str, is_public: bool, content: Content) -> Document {
    Document {
        id: DocumentId::new(id),
        title: title.to_string(),
        is_public,
        content,
        updated_at: Utc::now(),
    }
}

pub fn snapshot(title: &str, is_public: bool) -> DraftSnapshot {
    DraftSnapshot::new(title, is_public, Content::default())
}

pub fn credential() -> Credential {
    Credential::new("session-token")
}

pub fn entry(id: &str, ts: i64, title: &str) -> QueueEntry {
    QueueEntry {
        ts,
        payload: WritePayload::new(DocumentId::new(id), credential(), snapshot(title, false)),
    }
}

/// Let spawned tasks run without advancing past any debounce window.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
