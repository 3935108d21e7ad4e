use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::content::Content;

/// Opaque document identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(SmolStr);

impl DocumentId {
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Opaque authorization token passed through to the remote store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(SmolStr);

impl Credential {
    pub fn new(token: impl Into<SmolStr>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// The last edit state the user produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSnapshot {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub content: Content,
}

impl DraftSnapshot {
    pub fn new(title: impl Into<String>, is_public: bool, content: Content) -> Self {
        Self {
            title: title.into(),
            is_public,
            content,
        }
    }

    /// A never-written document: no title and nothing in the content.
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.content.is_blank()
    }
}

/// A full-document upsert request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WritePayload {
    pub document_id: DocumentId,
    pub credential: Credential,
    pub title: String,
    pub is_public: bool,
    pub content: Content,
}

impl WritePayload {
    pub fn new(document_id: DocumentId, credential: Credential, snapshot: DraftSnapshot) -> Self {
        Self {
            document_id,
            credential,
            title: snapshot.title,
            is_public: snapshot.is_public,
            content: snapshot.content,
        }
    }

    pub fn snapshot(&self) -> DraftSnapshot {
        DraftSnapshot {
            title: self.title.clone(),
            is_public: self.is_public,
            content: self.content.clone(),
        }
    }
}

/// A write that could not reach the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Epoch milliseconds.
    pub ts: i64,
    pub payload: WritePayload,
}

/// The remote copy of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub is_public: bool,
    pub content: Content,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn snapshot(&self) -> DraftSnapshot {
        DraftSnapshot {
            title: self.title.clone(),
            is_public: self.is_public,
            content: self.content.clone(),
        }
    }

    /// The document as it stands after `payload` is applied.
    pub fn from_payload(payload: &WritePayload, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: payload.document_id.clone(),
            title: payload.title.clone(),
            is_public: payload.is_public,
            content: payload.content.clone(),
            updated_at,
        }
    }
}
