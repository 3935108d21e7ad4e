//! Attachment garbage collection.
//!
//! Each committed snapshot yields the set of attachment URLs anywhere in its
//! block tree. Diffing that against the previous committed set for the same
//! document gives the uploads nothing references any more, which are deleted
//! best-effort.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use smol_str::SmolStr;

use crate::content::Content;
use crate::document::DocumentId;
use crate::remote::AttachmentStore;

/// Attachment URLs referenced by a content tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaReferenceSet(BTreeSet<SmolStr>);

impl MediaReferenceSet {
    /// Scan the full tree, nested containers included.
    pub fn collect(content: &Content) -> Self {
        let mut urls = BTreeSet::new();
        content.visit(&mut |block| {
            if let Some(url) = block.media_url() {
                urls.insert(url.clone());
            }
        });
        Self(urls)
    }

    /// URLs in `self` that `next` no longer references.
    pub fn orphaned_by(&self, next: &MediaReferenceSet) -> Vec<SmolStr> {
        self.0.difference(&next.0).cloned().collect()
    }

    pub fn union(&self, other: &MediaReferenceSet) -> Self {
        Self(self.0.union(&other.0).cloned().collect())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.0.contains(url)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SmolStr> {
        self.0.iter()
    }
}

impl FromIterator<SmolStr> for MediaReferenceSet {
    fn from_iter<I: IntoIterator<Item = SmolStr>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What a commit cleaned up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub deleted: Vec<SmolStr>,
    pub failed: Vec<SmolStr>,
}

impl CollectionReport {
    pub fn orphaned(&self) -> usize {
        self.deleted.len() + self.failed.len()
    }
}

/// Remembers the last committed reference set per document.
pub struct MediaReferenceTracker<A> {
    attachments: Arc<A>,
    previous: DashMap<DocumentId, MediaReferenceSet>,
}

impl<A: AttachmentStore> MediaReferenceTracker<A> {
    pub fn new(attachments: Arc<A>) -> Self {
        Self {
            attachments,
            previous: DashMap::new(),
        }
    }

    /// Record the references a document had when it was opened.
    pub fn seed(&self, id: &DocumentId, references: MediaReferenceSet) {
        self.previous.insert(id.clone(), references);
    }

    pub fn recorded(&self, id: &DocumentId) -> Option<MediaReferenceSet> {
        self.previous.get(id).map(|set| set.clone())
    }

    pub fn forget(&self, id: &DocumentId) {
        self.previous.remove(id);
    }

    /// Diff `content` against the last recorded set and delete orphans.
    ///
    /// The new set is recorded before any deletion is attempted, and deletion
    /// failures are logged and reported but never returned as errors. A
    /// document that was never seeded records its first set without deleting.
    pub async fn on_commit(&self, id: &DocumentId, content: &Content) -> CollectionReport {
        let next = MediaReferenceSet::collect(content);
        let orphans = match self.previous.insert(id.clone(), next.clone()) {
            Some(previous) => previous.orphaned_by(&next),
            None => Vec::new(),
        };

        let mut report = CollectionReport::default();
        for url in orphans {
            match self.attachments.delete(&url).await {
                Ok(()) => {
                    tracing::debug!(document_id = %id, url = %url, "deleted orphaned attachment");
                    metrics::counter!("media_orphans_deleted_total").increment(1);
                    report.deleted.push(url);
                }
                Err(e) => {
                    tracing::warn!(
                        document_id = %id,
                        url = %url,
                        error = %e,
                        "failed to delete orphaned attachment"
                    );
                    report.failed.push(url);
                }
            }
        }
        report
    }
}
