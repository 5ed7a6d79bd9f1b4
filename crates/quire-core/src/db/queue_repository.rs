//! Durable storage for the push queue

use crate::error::Result;
use crate::models::{SyncOperation, SyncQueueItem};
use rusqlite::{params, Connection};

/// Trait for persisted queue operations
pub trait QueueRepository {
    /// Append an item at the tail
    fn append(&self, item: &SyncQueueItem) -> Result<()>;

    /// Load every queued item in FIFO order
    fn load_all(&self) -> Result<Vec<SyncQueueItem>>;

    /// Persist a new retry count for an item
    fn set_retries(&self, id: &str, retries: u32) -> Result<()>;

    /// Remove an item; returns whether a row was deleted
    fn remove(&self, id: &str) -> Result<bool>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncQueueItem> {
        let note_id: String = row.get(1)?;
        let operation: String = row.get(2)?;
        Ok(SyncQueueItem {
            id: row.get(0)?,
            note_id: note_id.parse().map_err(|error: uuid::Error| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    Box::new(error),
                )
            })?,
            operation: operation.parse::<SyncOperation>().map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    error.into(),
                )
            })?,
            enqueued_at: row.get(3)?,
            retries: row.get(4)?,
            payload: row.get(5)?,
        })
    }
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn append(&self, item: &SyncQueueItem) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_queue (id, note_id, operation, enqueued_at, retries, payload)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                item.id,
                item.note_id.as_str(),
                item.operation.as_str(),
                item.enqueued_at,
                item.retries,
                item.payload,
            ],
        )?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<SyncQueueItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, note_id, operation, enqueued_at, retries, payload
             FROM sync_queue
             ORDER BY seq ASC",
        )?;

        let items = stmt
            .query_map([], Self::parse_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(items)
    }

    fn set_retries(&self, id: &str, retries: u32) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue SET retries = ? WHERE id = ?",
            params![retries, id],
        )?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Note;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_append_and_load_in_order() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());

        let note = Note::new("ws", "A", "x");
        let first = SyncQueueItem::new(note.id, SyncOperation::Create, &note).unwrap();
        let second = SyncQueueItem::new(note.id, SyncOperation::Update, &note).unwrap();
        repo.append(&first).unwrap();
        repo.append(&second).unwrap();

        let loaded = repo.load_all().unwrap();
        assert_eq!(loaded, vec![first, second]);
    }

    #[test]
    fn test_load_keeps_append_order_within_one_millisecond() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());

        let older = Note::new("ws", "Older", "x");
        let newer = Note::new("ws", "Newer", "y");
        let mut appended = Vec::new();
        for _ in 0..20 {
            for note in [&newer, &older] {
                let mut item = SyncQueueItem::new(note.id, SyncOperation::Update, note).unwrap();
                item.enqueued_at = 1_000;
                repo.append(&item).unwrap();
                appended.push(item);
            }
        }

        assert_eq!(repo.load_all().unwrap(), appended);
    }

    #[test]
    fn test_retries_and_remove() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteQueueRepository::new(db.connection());

        let note = Note::new("ws", "A", "x");
        let item = SyncQueueItem::new(note.id, SyncOperation::Delete, &note).unwrap();
        repo.append(&item).unwrap();

        repo.set_retries(&item.id, 2).unwrap();
        assert_eq!(repo.load_all().unwrap()[0].retries, 2);

        assert!(repo.remove(&item.id).unwrap());
        assert!(!repo.remove(&item.id).unwrap());
        assert!(repo.load_all().unwrap().is_empty());
    }
}
