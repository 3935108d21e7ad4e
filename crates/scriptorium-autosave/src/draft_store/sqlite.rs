use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::{DraftStore, DraftSummary};
use crate::content::Content;
use crate::document::{DocumentId, DraftSnapshot, QueueEntry, WritePayload};
use crate::error::StorageError;

/// Draft store in a single SQLite file.
pub struct SqliteDraftStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteDraftStore {
    /// Open or create the store at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StorageError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }

        let mut conn = Connection::open(&path).map_err(|e| StorageError::Open {
            path: path.clone(),
            source: e,
        })?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StorageError::Pragma {
                pragma: "journal_mode",
                source: e,
            })?;

        Self::migrations()
            .to_latest(&mut conn)
            .map_err(|e| StorageError::Migration {
                message: e.to_string(),
            })?;

        tracing::debug!(path = %path.display(), "opened draft store");

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    fn migrations() -> Migrations<'static> {
        Migrations::new(vec![M::up(include_str!("migrations/001_drafts.sql"))])
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        f(&mut conn)
    }
}

fn timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

impl DraftStore for SqliteDraftStore {
    async fn save_draft(&self, id: &DocumentId, snapshot: &DraftSnapshot) -> Result<(), StorageError> {
        let content = serde_json::to_string(&snapshot.content)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO drafts (document_id, title, is_public, content, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(document_id) DO UPDATE SET
                     title = excluded.title,
                     is_public = excluded.is_public,
                     content = excluded.content,
                     updated_at = excluded.updated_at",
                params![
                    id.as_str(),
                    snapshot.title,
                    snapshot.is_public,
                    content,
                    Utc::now().timestamp_millis()
                ],
            )?;
            Ok(())
        })
    }

    async fn load_draft(&self, id: &DocumentId) -> Result<Option<DraftSnapshot>, StorageError> {
        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT title, is_public, content FROM drafts WHERE document_id = ?1",
                    params![id.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, bool>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?)
        })?;

        let Some((title, is_public, content)) = row else {
            return Ok(None);
        };
        let content: Content = serde_json::from_str(&content)?;
        Ok(Some(DraftSnapshot {
            title,
            is_public,
            content,
        }))
    }

    async fn append_queue_entry(&self, id: &DocumentId, entry: &QueueEntry) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&entry.payload)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queue_entries (document_id, ts, payload) VALUES (?1, ?2, ?3)",
                params![id.as_str(), entry.ts, payload],
            )?;
            Ok(())
        })
    }

    async fn read_queue(&self, id: &DocumentId) -> Result<Vec<QueueEntry>, StorageError> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT ts, payload FROM queue_entries WHERE document_id = ?1 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map(params![id.as_str()], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(ts, payload)| {
                let payload: WritePayload = serde_json::from_str(&payload)?;
                Ok(QueueEntry { ts, payload })
            })
            .collect()
    }

    async fn clear_queue(&self, id: &DocumentId) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM queue_entries WHERE document_id = ?1",
                params![id.as_str()],
            )?;
            Ok(())
        })
    }

    async fn replace_queue(&self, id: &DocumentId, remaining: &[QueueEntry]) -> Result<(), StorageError> {
        let encoded = remaining
            .iter()
            .map(|entry| Ok((entry.ts, serde_json::to_string(&entry.payload)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM queue_entries WHERE document_id = ?1",
                params![id.as_str()],
            )?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO queue_entries (document_id, ts, payload) VALUES (?1, ?2, ?3)",
                )?;
                for (ts, payload) in &encoded {
                    stmt.execute(params![id.as_str(), ts, payload])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn list_drafts(&self) -> Result<Vec<DraftSummary>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT d.document_id, d.title, d.is_public, d.updated_at,
                        (SELECT COUNT(*) FROM queue_entries q WHERE q.document_id = d.document_id)
                 FROM drafts d
                 ORDER BY d.document_id",
            )?;
            let drafts = stmt
                .query_map([], |row| {
                    Ok(DraftSummary {
                        id: DocumentId::new(row.get::<_, String>(0)?),
                        title: row.get(1)?,
                        is_public: row.get(2)?,
                        updated_at: timestamp(row.get(3)?),
                        queued: row.get::<_, i64>(4)?.try_into().unwrap_or_default(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(drafts)
        })
    }

    async fn queued_documents(&self) -> Result<Vec<DocumentId>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT document_id FROM queue_entries ORDER BY document_id",
            )?;
            let ids = stmt
                .query_map([], |row| Ok(DocumentId::new(row.get::<_, String>(0)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    async fn delete_draft(&self, id: &DocumentId) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM queue_entries WHERE document_id = ?1",
                params![id.as_str()],
            )?;
            tx.execute("DELETE FROM drafts WHERE document_id = ?1", params![id.as_str()])?;
            tx.commit()?;
            Ok(())
        })
    }
}
