//! Shared database service wrapper used by the sync engine and the CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::db::{
    Database, NoteRepository, QueueRepository, SqliteNoteRepository, SqliteQueueRepository,
    SqliteSyncStateRepository, SyncStateRepository,
};
use crate::models::{Note, SyncConflict, SyncQueueItem};
use crate::services::{LocalRecordStore, QueueStore, SyncStateStore};
use crate::{NoteId, Result};

/// Thread-safe service for DB and repository operations.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    ///
    /// A file that is not a valid database is moved aside and a fresh one is
    /// created in its place.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path) {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    path = %db_path.display(),
                    %error,
                    "Local database is unreadable; quarantining and recreating"
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path)?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn is_corrupted_db_error(error: &crate::Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base_name = db_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("quire.db");
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                from = %db_path.display(),
                to = %backup_path.display(),
                "Moved corrupted local DB file"
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!(path = %path.display(), "Removed stale database sidecar file");
            }
        }

        Ok(())
    }

    /// List notes newest-first.
    pub async fn list_notes(&self, limit: usize, offset: usize) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).list(limit, offset)
    }

    /// Fetch a live note by id.
    pub async fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).get(id)
    }

    /// Create a new note.
    pub async fn create_note(&self, workspace_id: &str, title: &str, content: &str) -> Result<Note> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).create(workspace_id, title, content)
    }

    /// Update a note's title and/or content.
    pub async fn update_note(
        &self,
        id: &NoteId,
        title: Option<&str>,
        content: Option<&str>,
    ) -> Result<Note> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).update(id, title, content)
    }

    /// Soft-delete a note and return its tombstone.
    pub async fn delete_note(&self, id: &NoteId) -> Result<Note> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).delete(id)
    }

    /// Insert or replace a note as-is.
    pub async fn save_note(&self, note: &Note) -> Result<()> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).save(note)
    }

    /// List recently resolved sync conflicts.
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).list_conflicts(limit)
    }
}

#[async_trait]
impl LocalRecordStore for DatabaseService {
    async fn get_by_id(&self, id: &NoteId) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).get_any(id)
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Note>> {
        self.list_notes(limit, offset).await
    }

    async fn save(&self, note: &Note) -> Result<()> {
        self.save_note(note).await
    }
}

#[async_trait]
impl QueueStore for DatabaseService {
    async fn append(&self, item: &SyncQueueItem) -> Result<()> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).append(item)
    }

    async fn load_all(&self) -> Result<Vec<SyncQueueItem>> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).load_all()
    }

    async fn set_retries(&self, id: &str, retries: u32) -> Result<()> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).set_retries(id, retries)
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).remove(id)
    }
}

#[async_trait]
impl SyncStateStore for DatabaseService {
    async fn save_base(&self, note: &Note) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).save_base(note)
    }

    async fn get_base(&self, id: &NoteId) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).get_base(id)
    }

    async fn clear_base(&self, id: &NoteId) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).clear_base(id)
    }

    async fn record_conflict(
        &self,
        note_id: &NoteId,
        local_updated_at: i64,
        remote_updated_at: i64,
        strategy: &str,
    ) -> Result<SyncConflict> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).record_conflict(
            note_id,
            local_updated_at,
            remote_updated_at,
            strategy,
        )
    }

    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        DatabaseService::list_conflicts(self, limit).await
    }
}
