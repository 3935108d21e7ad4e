use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{DraftStore, DraftSummary};
use crate::document::{DocumentId, DraftSnapshot, QueueEntry};
use crate::error::StorageError;

/// In-process store for ephemeral sessions and tests.
#[derive(Default)]
pub struct MemoryDraftStore {
    drafts: DashMap<DocumentId, (DraftSnapshot, DateTime<Utc>)>,
    queues: DashMap<DocumentId, Vec<QueueEntry>>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn queued(&self, id: &DocumentId) -> usize {
        self.queues.get(id).map_or(0, |queue| queue.len())
    }
}

impl DraftStore for MemoryDraftStore {
    async fn save_draft(&self, id: &DocumentId, snapshot: &DraftSnapshot) -> Result<(), StorageError> {
        self.drafts
            .insert(id.clone(), (snapshot.clone(), Utc::now()));
        Ok(())
    }

    async fn load_draft(&self, id: &DocumentId) -> Result<Option<DraftSnapshot>, StorageError> {
        Ok(self.drafts.get(id).map(|entry| entry.0.clone()))
    }

    async fn append_queue_entry(&self, id: &DocumentId, entry: &QueueEntry) -> Result<(), StorageError> {
        self.queues
            .entry(id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn read_queue(&self, id: &DocumentId) -> Result<Vec<QueueEntry>, StorageError> {
        Ok(self
            .queues
            .get(id)
            .map(|queue| queue.clone())
            .unwrap_or_default())
    }

    async fn clear_queue(&self, id: &DocumentId) -> Result<(), StorageError> {
        self.queues.remove(id);
        Ok(())
    }

    async fn replace_queue(&self, id: &DocumentId, remaining: &[QueueEntry]) -> Result<(), StorageError> {
        if remaining.is_empty() {
            self.queues.remove(id);
        } else {
            self.queues.insert(id.clone(), remaining.to_vec());
        }
        Ok(())
    }

    async fn list_drafts(&self) -> Result<Vec<DraftSummary>, StorageError> {
        let mut drafts: Vec<DraftSummary> = self
            .drafts
            .iter()
            .map(|entry| {
                let (snapshot, updated_at) = entry.value();
                DraftSummary {
                    id: entry.key().clone(),
                    title: snapshot.title.clone(),
                    is_public: snapshot.is_public,
                    queued: 0,
                    updated_at: *updated_at,
                }
            })
            .collect();
        for draft in &mut drafts {
            draft.queued = self.queued(&draft.id);
        }
        drafts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(drafts)
    }

    async fn queued_documents(&self) -> Result<Vec<DocumentId>, StorageError> {
        let mut ids: Vec<DocumentId> = self
            .queues
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_draft(&self, id: &DocumentId) -> Result<(), StorageError> {
        self.drafts.remove(id);
        self.queues.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Content;
    use crate::document::{Credential, WritePayload};

    fn entry(id: &str, ts: i64, title: &str) -> QueueEntry {
        QueueEntry {
            ts,
            payload: WritePayload::new(
                id.into(),
                Credential::new("t"),
                DraftSnapshot::new(title, false, Content::default()),
            ),
        }
    }

    #[tokio::test]
    async fn test_queue_keeps_insertion_order() {
        let store = MemoryDraftStore::new();
        let id = DocumentId::new("D1");
        // Appended out of timestamp order on purpose.
        store.append_queue_entry(&id, &entry("D1", 30, "c")).await.unwrap();
        store.append_queue_entry(&id, &entry("D1", 10, "a")).await.unwrap();

        let titles: Vec<_> = store
            .read_queue(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.payload.title)
            .collect();
        assert_eq!(titles, ["c", "a"]);
        assert_eq!(store.queued_documents().await.unwrap(), [id.clone()]);

        store.clear_queue(&id).await.unwrap();
        assert!(store.read_queue(&id).await.unwrap().is_empty());
        assert!(store.queued_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = MemoryDraftStore::new();
        let d1 = DocumentId::new("D1");
        let d2 = DocumentId::new("D2");
        store
            .save_draft(&d2, &DraftSnapshot::new("two", true, Content::default()))
            .await
            .unwrap();
        store
            .save_draft(&d1, &DraftSnapshot::new("one", false, Content::default()))
            .await
            .unwrap();
        store.append_queue_entry(&d1, &entry("D1", 1, "one")).await.unwrap();

        let listed = store.list_drafts().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, d1);
        assert_eq!(listed[0].queued, 1);
        assert_eq!(listed[1].title, "two");

        store.delete_draft(&d1).await.unwrap();
        assert!(store.load_draft(&d1).await.unwrap().is_none());
        assert!(store.read_queue(&d1).await.unwrap().is_empty());
    }
}
