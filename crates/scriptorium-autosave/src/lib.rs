//! Autosave and offline synchronization for the document editor.
//!
//! Edits are debounced into single writes, persisted locally as drafts,
//! queued when the remote store is unreachable and replayed in order once
//! connectivity returns. Attachments that a committed edit no longer
//! references are deleted along the way.
//!
//! - [`content`]: the block tree
//! - [`document`]: ids, snapshots, queue records
//! - [`draft_store`]: local persistence (SQLite or in-memory)
//! - [`media`]: attachment reference tracking and cleanup
//! - [`scheduler`]: injected timer and connectivity capability
//! - [`queue`]: offline queue and ordered replay
//! - [`autosave`]: the per-document debounce state machine
//! - [`engine`]: [`SyncEngine`] and [`EditorSession`]

pub mod autosave;
pub mod content;
pub mod document;
pub mod draft_store;
pub mod engine;
pub mod error;
pub mod lock;
pub mod media;
pub mod queue;
pub mod remote;
pub mod scheduler;

pub use autosave::{AutosaveConfig, AutosaveEvent, EditKind, SaveState};
pub use content::{Block, Content};
pub use document::{Credential, Document, DocumentId, DraftSnapshot, QueueEntry, WritePayload};
pub use draft_store::{DraftStore, DraftSummary, MemoryDraftStore, SqliteDraftStore};
pub use engine::{EditorSession, SyncEngine};
pub use error::{RemoteError, StorageError, SyncError};
pub use media::{MediaReferenceSet, MediaReferenceTracker};
pub use queue::{DrainOutcome, DrainReport, OfflineQueue, QueueDrainer};
pub use remote::{AttachmentStore, RemoteDocumentStore};
pub use scheduler::{CancelToken, Connectivity, LinkState, Scheduler, TokioScheduler, Unsubscribe};
