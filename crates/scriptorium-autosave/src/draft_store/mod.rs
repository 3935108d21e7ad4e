//! Durable local persistence for drafts and the offline queue.
//!
//! Everything is keyed by document id. The draft is overwritten in place on
//! every debounced edit; the queue is an ordered list of writes that could not
//! reach the remote store, returned in insertion order.

mod memory;
mod sqlite;

pub use memory::MemoryDraftStore;
pub use sqlite::SqliteDraftStore;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::document::{DocumentId, DraftSnapshot, QueueEntry};
use crate::error::StorageError;

/// Listing row for a stored draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSummary {
    pub id: DocumentId,
    pub title: String,
    pub is_public: bool,
    /// Number of pending queue entries.
    pub queued: usize,
    pub updated_at: DateTime<Utc>,
}

pub trait DraftStore: Send + Sync + 'static {
    /// Overwrite the draft for `id`.
    fn save_draft(
        &self,
        id: &DocumentId,
        snapshot: &DraftSnapshot,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn load_draft(
        &self,
        id: &DocumentId,
    ) -> impl Future<Output = Result<Option<DraftSnapshot>, StorageError>> + Send;

    fn append_queue_entry(
        &self,
        id: &DocumentId,
        entry: &QueueEntry,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Entries in the order they were appended.
    fn read_queue(
        &self,
        id: &DocumentId,
    ) -> impl Future<Output = Result<Vec<QueueEntry>, StorageError>> + Send;

    fn clear_queue(&self, id: &DocumentId) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Atomically swap the queue for `remaining`, keeping their order.
    fn replace_queue(
        &self,
        id: &DocumentId,
        remaining: &[QueueEntry],
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn list_drafts(&self) -> impl Future<Output = Result<Vec<DraftSummary>, StorageError>> + Send;

    /// Documents with at least one queued entry.
    fn queued_documents(
        &self,
    ) -> impl Future<Output = Result<Vec<DocumentId>, StorageError>> + Send;

    /// Remove the draft and any queued entries for `id`.
    fn delete_draft(&self, id: &DocumentId) -> impl Future<Output = Result<(), StorageError>> + Send;
}
