//! Seams to the remote persistence API and attachment storage.

use std::future::Future;

use crate::document::{Credential, Document, DocumentId, WritePayload};
use crate::error::RemoteError;

/// The backing document API.
///
/// `upsert` must fully replace the stored snapshot and be safe to repeat with
/// the same or an older payload, since queue replay resends superseded states.
pub trait RemoteDocumentStore: Send + Sync + 'static {
    fn upsert(&self, payload: &WritePayload) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn fetch(
        &self,
        id: &DocumentId,
        credential: &Credential,
    ) -> impl Future<Output = Result<Option<Document>, RemoteError>> + Send;
}

/// Storage for uploaded attachments.
pub trait AttachmentStore: Send + Sync + 'static {
    fn delete(&self, url: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
