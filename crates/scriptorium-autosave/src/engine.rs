//! Engine entry point: opening documents and replaying queues.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use futures_util::future::join;
use tokio::sync::broadcast;

use crate::autosave::{AutosaveConfig, AutosaveEvent, AutosaveScheduler, EditKind, SaveState, Services};
use crate::content::Content;
use crate::document::{Credential, DocumentId, DraftSnapshot};
use crate::draft_store::DraftStore;
use crate::error::{RemoteError, StorageError, SyncError};
use crate::media::MediaReferenceSet;
use crate::queue::DrainReport;
use crate::remote::{AttachmentStore, RemoteDocumentStore};
use crate::scheduler::{Scheduler, Unsubscribe};

/// Owns the shared collaborators and hands out [`EditorSession`]s.
pub struct SyncEngine<R, D, A> {
    services: Arc<Services<R, D, A>>,
    listener: Mutex<Option<Unsubscribe>>,
}

impl<R, D, A> SyncEngine<R, D, A>
where
    R: RemoteDocumentStore,
    D: DraftStore,
    A: AttachmentStore,
{
    pub fn new(
        remote: Arc<R>,
        drafts: Arc<D>,
        attachments: Arc<A>,
        scheduler: Arc<dyn Scheduler>,
        config: AutosaveConfig,
    ) -> Self {
        Self {
            services: Arc::new(Services::new(remote, drafts, attachments, scheduler, config)),
            listener: Mutex::new(None),
        }
    }

    /// Listen for reconnects and replay anything left from a prior session.
    ///
    /// Calling this again replaces the previous listener.
    pub async fn start(&self) -> Vec<DrainReport> {
        let weak = Arc::downgrade(&self.services);
        let listener = self
            .services
            .scheduler
            .on_connectivity_restored(Arc::new(move || {
                let weak = weak.clone();
                async move {
                    if let Some(services) = weak.upgrade() {
                        tracing::info!("connectivity restored, draining queues");
                        drain_pending(&*services).await;
                    }
                }
                .boxed()
            }));
        let previous = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(listener);
        drop(previous);

        drain_pending(&*self.services).await
    }

    /// Stop listening for reconnects.
    pub fn stop(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.unsubscribe();
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AutosaveEvent> {
        self.services.events.subscribe()
    }

    /// Open a document for editing.
    ///
    /// The local draft and the remote copy load concurrently. A local draft
    /// always wins as the initial state, whichever resolves first, and if it
    /// differs from the remote copy a save is scheduled so it reaches the
    /// remote store.
    pub async fn open(
        &self,
        id: DocumentId,
        credential: Credential,
    ) -> Result<EditorSession<R, D, A>, SyncError> {
        let services = &self.services;
        let autosave = Arc::new(AutosaveScheduler::new(
            id.clone(),
            credential.clone(),
            services.clone(),
        ));

        let (draft, remote) = join(
            services.drafts.load_draft(&id),
            services.remote.fetch(&id, &credential),
        )
        .await;

        let draft = draft.unwrap_or_else(|e| {
            tracing::warn!(document_id = %id, error = %e, "failed to load local draft");
            None
        });
        let confirmed = match remote {
            Ok(document) => document.map(|document| document.snapshot()),
            Err(RemoteError::Forbidden) => return Err(SyncError::Forbidden { document_id: id }),
            // Without a draft there is no known state to edit from. Starting
            // from an empty snapshot would overwrite the remote body on sync.
            Err(source) if draft.is_none() => {
                tracing::warn!(document_id = %id, error = %source, "no draft and remote unreachable");
                return Err(SyncError::Unavailable {
                    document_id: id,
                    source,
                });
            }
            Err(e) => {
                tracing::warn!(document_id = %id, error = %e, "failed to fetch remote copy");
                None
            }
        };

        let mut references = MediaReferenceSet::default();
        for snapshot in [&draft, &confirmed].into_iter().flatten() {
            references = references.union(&MediaReferenceSet::collect(&snapshot.content));
        }
        services.media.seed(&id, references);

        let initial = draft.clone().or_else(|| confirmed.clone());
        let restored = draft.filter(|draft| confirmed.as_ref() != Some(draft));
        autosave.mark_ready(initial, confirmed);
        services.register(&autosave);
        tracing::debug!(document_id = %id, restored = restored.is_some(), "document opened");

        if let Some(draft) = restored {
            autosave.on_edit(draft, EditKind::Content);
        }

        Ok(EditorSession { autosave })
    }

    /// Replay the queue for one document.
    pub async fn drain(&self, id: &DocumentId) -> Result<DrainReport, SyncError> {
        Ok(drain_one(&*self.services, id).await?)
    }

    /// Replay every queued document, unless offline.
    pub async fn drain_pending(&self) -> Vec<DrainReport> {
        drain_pending(&*self.services).await
    }
}

async fn drain_one<R, D, A>(
    services: &Services<R, D, A>,
    id: &DocumentId,
) -> Result<DrainReport, StorageError>
where
    R: RemoteDocumentStore,
    D: DraftStore,
    A: AttachmentStore,
{
    let report = services.drainer.drain(id).await?;
    services.settle_rejected(&report).await;
    if let Some(event) = AutosaveEvent::from_drain(&report) {
        services.publish(event);
    }
    Ok(report)
}

async fn drain_pending<R, D, A>(services: &Services<R, D, A>) -> Vec<DrainReport>
where
    R: RemoteDocumentStore,
    D: DraftStore,
    A: AttachmentStore,
{
    if !services.scheduler.is_online() {
        tracing::debug!("offline, skipping drain");
        return Vec::new();
    }

    let ids = match services.drafts.queued_documents().await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list queued documents");
            return Vec::new();
        }
    };

    let mut reports = Vec::with_capacity(ids.len());
    for id in ids {
        match drain_one(services, &id).await {
            Ok(report) => reports.push(report),
            Err(e) => tracing::warn!(document_id = %id, error = %e, "failed to drain queue"),
        }
    }
    reports
}

/// An open document.
///
/// Dropping the session disposes it: a pending autosave timer is cancelled.
/// Call [`EditorSession::flush`] first to keep the latest edit.
pub struct EditorSession<R, D, A>
where
    R: RemoteDocumentStore,
    D: DraftStore,
    A: AttachmentStore,
{
    autosave: Arc<AutosaveScheduler<R, D, A>>,
}

impl<R, D, A> EditorSession<R, D, A>
where
    R: RemoteDocumentStore,
    D: DraftStore,
    A: AttachmentStore,
{
    pub fn document_id(&self) -> &DocumentId {
        self.autosave.document_id()
    }

    pub fn state(&self) -> SaveState {
        self.autosave.state()
    }

    /// Current editor state.
    pub fn latest(&self) -> Option<DraftSnapshot> {
        self.autosave.latest()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.autosave.has_unsaved_changes()
    }

    pub fn edit(&self, snapshot: DraftSnapshot, kind: EditKind) {
        self.autosave.on_edit(snapshot, kind);
    }

    pub fn set_title(&self, title: impl Into<String>) {
        let mut snapshot = self.latest().unwrap_or_default();
        snapshot.title = title.into();
        self.edit(snapshot, EditKind::Metadata);
    }

    /// Optimistic visibility toggle. Reverted if the remote store refuses it.
    pub fn set_public(&self, is_public: bool) {
        let mut snapshot = self.latest().unwrap_or_default();
        snapshot.is_public = is_public;
        self.edit(snapshot, EditKind::Metadata);
    }

    pub fn set_content(&self, content: Content) {
        let mut snapshot = self.latest().unwrap_or_default();
        snapshot.content = content;
        self.edit(snapshot, EditKind::Content);
    }

    /// Save now instead of waiting for the debounce window.
    pub async fn flush(&self) -> Option<AutosaveEvent> {
        self.autosave.flush().await
    }

    pub fn dispose(&self) {
        self.autosave.dispose();
    }
}

impl<R, D, A> Drop for EditorSession<R, D, A>
where
    R: RemoteDocumentStore,
    D: DraftStore,
    A: AttachmentStore,
{
    fn drop(&mut self) {
        self.autosave.dispose();
    }
}
