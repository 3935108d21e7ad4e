//! Offline queue and ordered replay.
//!
//! A write that cannot reach the remote store is appended, never merged, with
//! a timestamp. Replay sorts by timestamp and sends entries one at a time,
//! awaiting each before the next, and stops at the first failure so an entry
//! is never applied after an earlier one failed.

use std::sync::Arc;

use chrono::Utc;
use scriptorium_common::perf::TimingGuard;

use crate::document::{DocumentId, QueueEntry, WritePayload};
use crate::draft_store::DraftStore;
use crate::error::{RemoteError, StorageError};
use crate::lock::DocumentLocks;
use crate::remote::RemoteDocumentStore;

/// Append-only list of pending writes, persisted through a [`DraftStore`].
pub struct OfflineQueue<D> {
    drafts: Arc<D>,
}

impl<D: DraftStore> OfflineQueue<D> {
    pub fn new(drafts: Arc<D>) -> Self {
        Self { drafts }
    }

    /// Append `payload` stamped with the current time.
    ///
    /// Timestamps are strictly increasing per document, so a clock stepping
    /// backwards cannot reorder replay.
    pub async fn enqueue(&self, payload: WritePayload) -> Result<QueueEntry, StorageError> {
        let id = payload.document_id.clone();
        let existing = self.drafts.read_queue(&id).await?;
        let now = Utc::now().timestamp_millis();
        let ts = existing
            .iter()
            .map(|entry| entry.ts)
            .max()
            .map_or(now, |last| now.max(last + 1));

        let entry = QueueEntry { ts, payload };
        self.drafts.append_queue_entry(&id, &entry).await?;
        metrics::counter!("autosave_queued_total").increment(1);
        tracing::info!(document_id = %id, ts, pending = existing.len() + 1, "queued write");
        Ok(entry)
    }

    pub async fn pending(&self, id: &DocumentId) -> Result<Vec<QueueEntry>, StorageError> {
        self.drafts.read_queue(id).await
    }

    pub async fn is_empty(&self, id: &DocumentId) -> Result<bool, StorageError> {
        Ok(self.drafts.read_queue(id).await?.is_empty())
    }
}

/// How a drain pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing was queued.
    Empty,
    /// Every entry was applied and the queue cleared.
    Complete,
    /// An entry could not be delivered. It and everything after it are
    /// still queued.
    Stopped { error: RemoteError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub document_id: DocumentId,
    pub sent: usize,
    pub remaining: usize,
    /// Entries the remote store refused by policy. They are removed from the
    /// queue and never resent.
    pub rejected: Vec<QueueEntry>,
    pub outcome: DrainOutcome,
}

impl DrainReport {
    fn empty(id: &DocumentId) -> Self {
        Self {
            document_id: id.clone(),
            sent: 0,
            remaining: 0,
            rejected: Vec::new(),
            outcome: DrainOutcome::Empty,
        }
    }

    pub fn is_complete(&self) -> bool {
        !matches!(self.outcome, DrainOutcome::Stopped { .. })
    }
}

/// Replays queued writes against the remote store.
pub struct QueueDrainer<R, D> {
    remote: Arc<R>,
    drafts: Arc<D>,
    locks: DocumentLocks,
}

impl<R: RemoteDocumentStore, D: DraftStore> QueueDrainer<R, D> {
    pub fn new(remote: Arc<R>, drafts: Arc<D>, locks: DocumentLocks) -> Self {
        Self {
            remote,
            drafts,
            locks,
        }
    }

    /// Drain one document, holding its lock for the whole pass.
    pub async fn drain(&self, id: &DocumentId) -> Result<DrainReport, StorageError> {
        let _guard = self.locks.acquire(id).await;
        self.drain_locked(id).await
    }

    /// Drain one document. The caller must already hold its lock.
    ///
    /// A policy rejection drops that entry and moves on to the next one. Any
    /// other failure stops the pass with the failed entry still at the head.
    pub async fn drain_locked(&self, id: &DocumentId) -> Result<DrainReport, StorageError> {
        let mut entries = self.drafts.read_queue(id).await?;
        if entries.is_empty() {
            return Ok(DrainReport::empty(id));
        }

        let _timing = TimingGuard::new("queue drain");
        // Stable, so equal timestamps keep insertion order.
        entries.sort_by_key(|entry| entry.ts);
        tracing::info!(document_id = %id, pending = entries.len(), "draining queue");

        let mut sent = 0;
        let mut rejected = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            match self.remote.upsert(&entry.payload).await {
                Ok(()) => sent += 1,
                Err(RemoteError::Forbidden) => {
                    tracing::warn!(document_id = %id, ts = entry.ts, "queued write rejected by policy, dropped");
                    rejected.push(entry.clone());
                }
                Err(error) => {
                    let remaining = &entries[index..];
                    self.drafts.replace_queue(id, remaining).await?;
                    metrics::counter!("queue_drained_entries_total").increment(sent as u64);
                    tracing::warn!(
                        document_id = %id,
                        sent,
                        remaining = remaining.len(),
                        error = %error,
                        "drain stopped"
                    );
                    return Ok(DrainReport {
                        document_id: id.clone(),
                        sent,
                        remaining: remaining.len(),
                        rejected,
                        outcome: DrainOutcome::Stopped { error },
                    });
                }
            }
        }

        self.drafts.clear_queue(id).await?;
        metrics::counter!("queue_drained_entries_total").increment(sent as u64);
        tracing::info!(document_id = %id, sent, rejected = rejected.len(), "queue drained");
        Ok(DrainReport {
            document_id: id.clone(),
            sent,
            remaining: 0,
            rejected,
            outcome: DrainOutcome::Complete,
        })
    }
}
