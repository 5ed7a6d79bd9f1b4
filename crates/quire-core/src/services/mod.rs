//! Async service layer over the local database.
//!
//! The sync engine only sees the capability traits below; `DatabaseService`
//! implements all three over `SQLite`.

mod database;

use async_trait::async_trait;

use crate::models::{Note, NoteId, SyncConflict, SyncQueueItem};
use crate::Result;

pub use database::DatabaseService;

/// Persistent note storage as seen by the sync engine.
#[async_trait]
pub trait LocalRecordStore: Send + Sync {
    /// Fetch a note by id, including soft-deleted tombstones.
    async fn get_by_id(&self, id: &NoteId) -> Result<Option<Note>>;

    /// Live notes, newest first.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Note>>;

    /// Insert or replace a note exactly as given.
    async fn save(&self, note: &Note) -> Result<()>;
}

/// Durable backing for the push queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn append(&self, item: &SyncQueueItem) -> Result<()>;

    async fn load_all(&self) -> Result<Vec<SyncQueueItem>>;

    async fn set_retries(&self, id: &str, retries: u32) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<bool>;
}

/// Last-synced bases and the conflict log.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn save_base(&self, note: &Note) -> Result<()>;

    async fn get_base(&self, id: &NoteId) -> Result<Option<Note>>;

    async fn clear_base(&self, id: &NoteId) -> Result<()>;

    async fn record_conflict(
        &self,
        note_id: &NoteId,
        local_updated_at: i64,
        remote_updated_at: i64,
        strategy: &str,
    ) -> Result<SyncConflict>;

    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}
