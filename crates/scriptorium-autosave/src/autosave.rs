//! Debounced autosave for one open document.
//!
//! Edits only record the latest snapshot and restart a timer. When the timer
//! fires the scheduler takes the document lock, saves the local draft, runs
//! media cleanup, and attempts the remote write. Only the snapshot current at
//! that moment is written, and at most one write per document is in flight.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use scriptorium_common::AutosaveSettings;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::document::{Credential, DocumentId, DraftSnapshot, QueueEntry, WritePayload};
use crate::draft_store::DraftStore;
use crate::error::RemoteError;
use crate::lock::DocumentLocks;
use crate::media::MediaReferenceTracker;
use crate::queue::{DrainOutcome, DrainReport, OfflineQueue, QueueDrainer};
use crate::remote::{AttachmentStore, RemoteDocumentStore};
use crate::scheduler::{CancelToken, Scheduler};

/// Autosave lifecycle.
///
/// `Loading -> Ready`, then `Ready -> Dirty` on edit, `Dirty -> Saving` when
/// the debounce timer fires, and back to `Ready` once the write settles. An
/// edit made while saving leaves the document `Dirty` after the write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SaveState {
    #[default]
    Loading,
    Ready,
    Dirty,
    Saving,
}

impl SaveState {
    pub fn is_loading(&self) -> bool {
        matches!(self, SaveState::Loading)
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self, SaveState::Dirty)
    }

    pub fn is_saving(&self) -> bool {
        matches!(self, SaveState::Saving)
    }

    /// Edits are ignored until the initial state has loaded.
    pub fn accepts_edits(&self) -> bool {
        !self.is_loading()
    }
}

/// What kind of change an edit made. Selects the debounce window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    /// Title or visibility only.
    Metadata,
    /// Block content.
    Content,
}

#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    pub metadata_debounce: Duration,
    pub content_debounce: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl AutosaveConfig {
    pub fn debounce_for(&self, kind: EditKind) -> Duration {
        match kind {
            EditKind::Metadata => self.metadata_debounce,
            EditKind::Content => self.content_debounce,
        }
    }
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self::from(&AutosaveSettings::default())
    }
}

impl From<&AutosaveSettings> for AutosaveConfig {
    fn from(settings: &AutosaveSettings) -> Self {
        Self {
            metadata_debounce: Duration::from_millis(settings.metadata_debounce_ms),
            content_debounce: Duration::from_millis(settings.content_debounce_ms),
            event_capacity: 64,
        }
    }
}

/// Outcomes hosts can surface to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutosaveEvent {
    /// The remote store accepted the snapshot.
    Saved {
        document_id: DocumentId,
        snapshot: DraftSnapshot,
    },
    /// The remote store was unreachable; the write is queued for replay.
    Queued { document_id: DocumentId, ts: i64 },
    /// The write was refused by policy. Visibility was reverted to the last
    /// confirmed value and the write will not be retried.
    Rejected {
        document_id: DocumentId,
        reverted: DraftSnapshot,
    },
    /// Queued writes were replayed.
    Drained { document_id: DocumentId, sent: usize },
    /// Replay stopped at a failing entry. The rest stay queued.
    DrainStopped {
        document_id: DocumentId,
        sent: usize,
        remaining: usize,
        error: RemoteError,
    },
}

impl AutosaveEvent {
    pub fn document_id(&self) -> &DocumentId {
        match self {
            AutosaveEvent::Saved { document_id, .. }
            | AutosaveEvent::Queued { document_id, .. }
            | AutosaveEvent::Rejected { document_id, .. }
            | AutosaveEvent::Drained { document_id, .. }
            | AutosaveEvent::DrainStopped { document_id, .. } => document_id,
        }
    }

    /// The event a drain report produces, if any.
    pub fn from_drain(report: &DrainReport) -> Option<Self> {
        match &report.outcome {
            DrainOutcome::Empty => None,
            DrainOutcome::Complete => Some(AutosaveEvent::Drained {
                document_id: report.document_id.clone(),
                sent: report.sent,
            }),
            DrainOutcome::Stopped { error } => Some(AutosaveEvent::DrainStopped {
                document_id: report.document_id.clone(),
                sent: report.sent,
                remaining: report.remaining,
                error: error.clone(),
            }),
        }
    }
}

/// Collaborators shared by every open document.
pub(crate) struct Services<R, D, A> {
    pub(crate) remote: Arc<R>,
    pub(crate) drafts: Arc<D>,
    pub(crate) queue: OfflineQueue<D>,
    pub(crate) drainer: QueueDrainer<R, D>,
    pub(crate) media: MediaReferenceTracker<A>,
    pub(crate) locks: DocumentLocks,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) config: AutosaveConfig,
    pub(crate) events: broadcast::Sender<AutosaveEvent>,
    /// Open sessions, so replayed rejections can reach the editor state.
    pub(crate) sessions: DashMap<DocumentId, Weak<AutosaveScheduler<R, D, A>>>,
}

impl<R, D, A> Services<R, D, A>
where
    R: RemoteDocumentStore,
    D: DraftStore,
    A: AttachmentStore,
{
    pub(crate) fn new(
        remote: Arc<R>,
        drafts: Arc<D>,
        attachments: Arc<A>,
        scheduler: Arc<dyn Scheduler>,
        config: AutosaveConfig,
    ) -> Self {
        let locks = DocumentLocks::new();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            queue: OfflineQueue::new(drafts.clone()),
            drainer: QueueDrainer::new(remote.clone(), drafts.clone(), locks.clone()),
            media: MediaReferenceTracker::new(attachments),
            remote,
            drafts,
            locks,
            scheduler,
            config,
            events,
            sessions: DashMap::new(),
        }
    }

    pub(crate) fn publish(&self, event: AutosaveEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    pub(crate) fn register(&self, session: &Arc<AutosaveScheduler<R, D, A>>) {
        self.sessions
            .insert(session.document_id().clone(), Arc::downgrade(session));
    }

    /// Revert and report every entry a drain dropped as rejected.
    pub(crate) async fn settle_rejected(&self, report: &DrainReport) {
        let id = &report.document_id;
        for entry in &report.rejected {
            let session = self.sessions.get(id).and_then(|session| session.upgrade());
            let event = match session {
                Some(session) => session.reject(entry.payload.snapshot()).await,
                None => self.reject_offline(id, entry).await,
            };
            self.publish(event);
        }
    }

    /// Revert a rejected entry for a document with no open session.
    ///
    /// The confirmed visibility is unknown here, so the stored draft falls
    /// back to private.
    async fn reject_offline(&self, id: &DocumentId, entry: &QueueEntry) -> AutosaveEvent {
        let draft = match self.drafts.load_draft(id).await {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!(document_id = %id, error = %e, "failed to load draft to revert");
                None
            }
        };

        metrics::counter!("autosave_rejected_total").increment(1);
        tracing::warn!(document_id = %id, ts = entry.ts, "queued write rejected by policy");

        let reverted = match draft {
            Some(draft) => {
                let reverted = DraftSnapshot {
                    is_public: false,
                    ..draft
                };
                if let Err(e) = self.drafts.save_draft(id, &reverted).await {
                    tracing::warn!(document_id = %id, error = %e, "failed to save reverted draft");
                }
                reverted
            }
            None => DraftSnapshot {
                is_public: false,
                ..entry.payload.snapshot()
            },
        };

        AutosaveEvent::Rejected {
            document_id: id.clone(),
            reverted,
        }
    }
}

#[derive(Default)]
struct DocState {
    state: SaveState,
    latest: Option<DraftSnapshot>,
    /// Last snapshot the remote store is known to hold.
    confirmed: Option<DraftSnapshot>,
    timer: Option<CancelToken>,
    disposed: bool,
}

impl DocState {
    fn timer_pending(&self) -> bool {
        self.timer.as_ref().is_some_and(CancelToken::is_pending)
    }

    fn settle(&mut self) {
        self.state = if self.timer_pending() {
            SaveState::Dirty
        } else {
            SaveState::Ready
        };
    }
}

/// Autosave state machine for one document.
pub struct AutosaveScheduler<R, D, A> {
    document_id: DocumentId,
    credential: Credential,
    services: Arc<Services<R, D, A>>,
    doc: Mutex<DocState>,
}

impl<R, D, A> AutosaveScheduler<R, D, A>
where
    R: RemoteDocumentStore,
    D: DraftStore,
    A: AttachmentStore,
{
    pub(crate) fn new(
        document_id: DocumentId,
        credential: Credential,
        services: Arc<Services<R, D, A>>,
    ) -> Self {
        Self {
            document_id,
            credential,
            services,
            doc: Mutex::new(DocState::default()),
        }
    }

    fn doc(&self) -> MutexGuard<'_, DocState> {
        // DocState stays consistent across a panic: every field is assigned whole.
        self.doc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn state(&self) -> SaveState {
        self.doc().state
    }

    pub fn latest(&self) -> Option<DraftSnapshot> {
        self.doc().latest.clone()
    }

    pub fn confirmed(&self) -> Option<DraftSnapshot> {
        self.doc().confirmed.clone()
    }

    /// True when the latest snapshot is not yet known to be on the remote.
    pub fn has_unsaved_changes(&self) -> bool {
        let doc = self.doc();
        match &doc.latest {
            Some(latest) => doc.confirmed.as_ref() != Some(latest),
            None => false,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.doc().disposed
    }

    /// Finish loading with the initial editor state.
    pub(crate) fn mark_ready(&self, initial: Option<DraftSnapshot>, confirmed: Option<DraftSnapshot>) {
        let mut doc = self.doc();
        if !doc.state.is_loading() {
            return;
        }
        doc.latest = initial;
        doc.confirmed = confirmed;
        doc.state = SaveState::Ready;
    }

    /// Record `snapshot` and restart the debounce timer.
    ///
    /// Ignored while loading and after disposal.
    pub fn on_edit(self: &Arc<Self>, snapshot: DraftSnapshot, kind: EditKind) {
        let mut doc = self.doc();
        if doc.disposed || !doc.state.accepts_edits() {
            tracing::trace!(document_id = %self.document_id, state = ?doc.state, "edit ignored");
            return;
        }

        doc.latest = Some(snapshot);
        if !doc.state.is_saving() {
            doc.state = SaveState::Dirty;
        }
        if let Some(timer) = doc.timer.take() {
            timer.cancel();
        }

        let delay = self.services.config.debounce_for(kind);
        let this = Arc::downgrade(self);
        doc.timer = Some(self.services.scheduler.schedule(delay, Box::pin(fire_weak(this))));
        tracing::trace!(document_id = %self.document_id, ?kind, delay_ms = delay.as_millis() as u64, "autosave scheduled");
    }

    /// Cancel any pending timer and save now.
    pub async fn flush(&self) -> Option<AutosaveEvent> {
        if let Some(timer) = self.doc().timer.take() {
            timer.cancel();
        }
        self.fire().await
    }

    /// Cancel any pending timer. Nothing is written after this returns,
    /// except a write that had already started.
    pub fn dispose(&self) {
        let mut doc = self.doc();
        if doc.disposed {
            return;
        }
        doc.disposed = true;
        if let Some(timer) = doc.timer.take() {
            timer.cancel();
        }
        tracing::debug!(document_id = %self.document_id, "autosave disposed");
    }

    /// Write the latest snapshot if there is anything to write.
    async fn fire(&self) -> Option<AutosaveEvent> {
        let _guard = self.services.locks.acquire(&self.document_id).await;

        let snapshot = {
            let mut doc = self.doc();
            if doc.disposed {
                return None;
            }
            let Some(snapshot) = doc.latest.clone() else {
                doc.settle();
                return None;
            };
            if doc.confirmed.as_ref() == Some(&snapshot) {
                tracing::trace!(document_id = %self.document_id, "snapshot already saved");
                doc.settle();
                return None;
            }
            if snapshot.is_empty() && doc.confirmed.is_none() {
                tracing::trace!(document_id = %self.document_id, "nothing to save yet");
                doc.settle();
                return None;
            }
            doc.state = SaveState::Saving;
            snapshot
        };

        let event = self.commit(snapshot).await;

        self.doc().settle();
        if let Some(event) = &event {
            self.services.publish(event.clone());
        }
        event
    }

    /// Persist `snapshot`. Runs under the document lock.
    async fn commit(&self, mut snapshot: DraftSnapshot) -> Option<AutosaveEvent> {
        let id = &self.document_id;
        let services = &self.services;

        if let Err(e) = services.drafts.save_draft(id, &snapshot).await {
            tracing::warn!(document_id = %id, error = %e, "failed to save local draft");
        }
        services.media.on_commit(id, &snapshot.content).await;

        // Older queued writes go first so this one cannot be overwritten by them.
        match services.queue.is_empty(id).await {
            Ok(true) => {}
            Ok(false) => match services.drainer.drain_locked(id).await {
                Ok(report) => {
                    services.settle_rejected(&report).await;
                    if let Some(event) = AutosaveEvent::from_drain(&report) {
                        services.publish(event);
                    }
                    // A rejected toggle has been reverted on the session.
                    // Carry that into this write instead of resending it.
                    if !report.rejected.is_empty() {
                        if let Some(latest) = self.latest() {
                            snapshot.is_public = latest.is_public;
                        }
                    }
                    if !report.is_complete() {
                        return self.enqueue(self.payload(&snapshot)).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(document_id = %id, error = %e, "failed to drain before write");
                    return self.enqueue(self.payload(&snapshot)).await;
                }
            },
            Err(e) => {
                tracing::warn!(document_id = %id, error = %e, "failed to read queue");
            }
        }

        let payload = self.payload(&snapshot);
        metrics::counter!("autosave_writes_total").increment(1);
        tracing::debug!(document_id = %id, "writing snapshot");
        match services.remote.upsert(&payload).await {
            Ok(()) => {
                tracing::debug!(document_id = %id, "snapshot saved");
                self.doc().confirmed = Some(snapshot.clone());
                Some(AutosaveEvent::Saved {
                    document_id: id.clone(),
                    snapshot,
                })
            }
            Err(RemoteError::Forbidden) => Some(self.reject(snapshot).await),
            Err(e) => {
                tracing::debug!(document_id = %id, error = %e, "remote unreachable");
                self.enqueue(payload).await
            }
        }
    }

    fn payload(&self, snapshot: &DraftSnapshot) -> WritePayload {
        WritePayload::new(
            self.document_id.clone(),
            self.credential.clone(),
            snapshot.clone(),
        )
    }

    async fn enqueue(&self, payload: WritePayload) -> Option<AutosaveEvent> {
        match self.services.queue.enqueue(payload).await {
            Ok(entry) => Some(AutosaveEvent::Queued {
                document_id: self.document_id.clone(),
                ts: entry.ts,
            }),
            Err(e) => {
                // The local draft is now the only copy of this edit.
                tracing::error!(document_id = %self.document_id, error = %e, "failed to queue write");
                None
            }
        }
    }

    /// Revert the optimistic visibility toggle after a policy rejection.
    ///
    /// Visibility goes back to the last confirmed value on the current editor
    /// state, which is saved as the local draft. `rejected` is only used when
    /// the session holds no state yet.
    pub(crate) async fn reject(&self, rejected: DraftSnapshot) -> AutosaveEvent {
        let reverted = {
            let mut doc = self.doc();
            let confirmed_public = doc.confirmed.as_ref().is_some_and(|c| c.is_public);
            match doc.latest.as_mut() {
                Some(latest) => {
                    latest.is_public = confirmed_public;
                    latest.clone()
                }
                None => DraftSnapshot {
                    is_public: confirmed_public,
                    ..rejected
                },
            }
        };

        metrics::counter!("autosave_rejected_total").increment(1);
        tracing::warn!(
            document_id = %self.document_id,
            is_public = reverted.is_public,
            "write rejected by policy, visibility reverted"
        );

        if let Err(e) = self
            .services
            .drafts
            .save_draft(&self.document_id, &reverted)
            .await
        {
            tracing::warn!(document_id = %self.document_id, error = %e, "failed to save reverted draft");
        }

        AutosaveEvent::Rejected {
            document_id: self.document_id.clone(),
            reverted,
        }
    }
}

async fn fire_weak<R, D, A>(this: Weak<AutosaveScheduler<R, D, A>>)
where
    R: RemoteDocumentStore,
    D: DraftStore,
    A: AttachmentStore,
{
    if let Some(this) = this.upgrade() {
        this.fire().await;
    }
}

impl<R, D, A> Drop for AutosaveScheduler<R, D, A> {
    fn drop(&mut self) {
        let doc = self.doc.get_mut().unwrap_or_else(PoisonError::into_inner);
        doc.disposed = true;
        if let Some(timer) = doc.timer.take() {
            timer.cancel();
        }
        // A newer session for the same id may have replaced this entry.
        self.services
            .sessions
            .remove_if(&self.document_id, |_, session| session.strong_count() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Block, Content};
    use crate::document::Document;
    use crate::draft_store::MemoryDraftStore;
    use crate::scheduler::{Connectivity, TokioScheduler};

    #[derive(Default)]
    struct Remote {
        calls: std::sync::Mutex<Vec<WritePayload>>,
    }

    impl RemoteDocumentStore for Remote {
        async fn upsert(&self, payload: &WritePayload) -> Result<(), RemoteError> {
            self.calls.lock().unwrap().push(payload.clone());
            Ok(())
        }

        async fn fetch(
            &self,
            _id: &DocumentId,
            _credential: &Credential,
        ) -> Result<Option<Document>, RemoteError> {
            Ok(None)
        }
    }

    struct NoAttachments;

    impl AttachmentStore for NoAttachments {
        async fn delete(&self, _url: &str) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    type TestScheduler = AutosaveScheduler<Remote, MemoryDraftStore, NoAttachments>;

    fn autosave(remote: Arc<Remote>) -> Arc<TestScheduler> {
        let scheduler = TokioScheduler::try_current(Connectivity::default()).unwrap();
        let services = Arc::new(Services::new(
            remote,
            Arc::new(MemoryDraftStore::new()),
            Arc::new(NoAttachments),
            Arc::new(scheduler),
            AutosaveConfig::default(),
        ));
        Arc::new(AutosaveScheduler::new("D1".into(), Credential::new("t"), services))
    }

    fn titled(title: &str) -> DraftSnapshot {
        DraftSnapshot::new(title, false, Content::new(vec![Block::paragraph("body")]))
    }

    #[test]
    fn test_state_default_is_loading() {
        let state = SaveState::default();
        assert!(state.is_loading());
        assert!(!state.accepts_edits());
        assert!(SaveState::Dirty.accepts_edits());
    }

    #[test]
    fn test_debounce_windows_from_settings() {
        let config = AutosaveConfig::from(&AutosaveSettings {
            metadata_debounce_ms: 10,
            content_debounce_ms: 20,
        });
        assert_eq!(config.debounce_for(EditKind::Metadata), Duration::from_millis(10));
        assert_eq!(config.debounce_for(EditKind::Content), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_while_loading_are_ignored() {
        let remote = Arc::new(Remote::default());
        let autosave = autosave(remote.clone());

        autosave.on_edit(titled("too early"), EditKind::Content);
        assert_eq!(autosave.state(), SaveState::Loading);
        assert!(autosave.latest().is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(remote.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions() {
        let remote = Arc::new(Remote::default());
        let autosave = autosave(remote.clone());
        autosave.mark_ready(Some(titled("A")), Some(titled("A")));
        assert_eq!(autosave.state(), SaveState::Ready);
        assert!(!autosave.has_unsaved_changes());

        autosave.on_edit(titled("B"), EditKind::Metadata);
        assert_eq!(autosave.state(), SaveState::Dirty);
        assert!(autosave.has_unsaved_changes());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(autosave.state(), SaveState::Ready);
        assert!(!autosave.has_unsaved_changes());
        assert_eq!(remote.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_follows_latest_edit_kind() {
        let remote = Arc::new(Remote::default());
        let autosave = autosave(remote.clone());
        autosave.mark_ready(Some(titled("A")), Some(titled("A")));

        autosave.on_edit(titled("B"), EditKind::Content);
        autosave.on_edit(titled("C"), EditKind::Metadata);
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let calls = remote.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].title, "C");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_new_document_is_not_written() {
        let remote = Arc::new(Remote::default());
        let autosave = autosave(remote.clone());
        autosave.mark_ready(None, None);

        autosave.on_edit(DraftSnapshot::default(), EditKind::Content);
        assert!(autosave.flush().await.is_none());
        assert!(remote.calls.lock().unwrap().is_empty());
        assert_eq!(autosave.state(), SaveState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_snapshot_is_skipped() {
        let remote = Arc::new(Remote::default());
        let autosave = autosave(remote.clone());
        autosave.mark_ready(Some(titled("A")), Some(titled("A")));

        autosave.on_edit(titled("A"), EditKind::Metadata);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(remote.calls.lock().unwrap().is_empty());
        assert_eq!(autosave.state(), SaveState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_pending_write() {
        let remote = Arc::new(Remote::default());
        let autosave = autosave(remote.clone());
        autosave.mark_ready(Some(titled("A")), Some(titled("A")));

        autosave.on_edit(titled("B"), EditKind::Content);
        autosave.dispose();
        autosave.on_edit(titled("C"), EditKind::Content);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(remote.calls.lock().unwrap().is_empty());
        assert!(autosave.is_disposed());
        assert!(autosave.flush().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_scheduler_cancels_the_timer() {
        let remote = Arc::new(Remote::default());
        let autosave = autosave(remote.clone());
        autosave.mark_ready(Some(titled("A")), Some(titled("A")));

        autosave.on_edit(titled("B"), EditKind::Content);
        drop(autosave);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(remote.calls.lock().unwrap().is_empty());
    }
}
