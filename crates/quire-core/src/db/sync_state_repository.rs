//! Last-synced bases and the conflict log

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{Note, NoteId, SyncConflict};
use crate::util::unix_timestamp_millis;
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for sync bookkeeping
pub trait SyncStateRepository {
    /// Record `note` as the version both sides last agreed on
    fn save_base(&self, note: &Note) -> Result<()>;

    /// Last-synced version of a note, if any
    fn get_base(&self, id: &NoteId) -> Result<Option<Note>>;

    /// Drop the base for a note
    fn clear_base(&self, id: &NoteId) -> Result<()>;

    /// Append a resolved conflict to the log
    fn record_conflict(
        &self,
        note_id: &NoteId,
        local_updated_at: i64,
        remote_updated_at: i64,
        strategy: &str,
    ) -> Result<SyncConflict>;

    /// Most recent conflicts first
    fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}

/// `SQLite` implementation of `SyncStateRepository`
pub struct SqliteSyncStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncStateRepository for SqliteSyncStateRepository<'_> {
    fn save_base(&self, note: &Note) -> Result<()> {
        let snapshot = serde_json::to_string(note)?;
        self.conn.execute(
            "INSERT INTO sync_base (note_id, snapshot, synced_at) VALUES (?, ?, ?)
             ON CONFLICT(note_id) DO UPDATE SET
                snapshot = excluded.snapshot,
                synced_at = excluded.synced_at",
            params![note.id.as_str(), snapshot, unix_timestamp_millis()],
        )?;
        Ok(())
    }

    fn get_base(&self, id: &NoteId) -> Result<Option<Note>> {
        let snapshot: Option<String> = self
            .conn
            .query_row(
                "SELECT snapshot FROM sync_base WHERE note_id = ?",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        snapshot
            .map(|raw| serde_json::from_str(&raw).map_err(Into::into))
            .transpose()
    }

    fn clear_base(&self, id: &NoteId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM sync_base WHERE note_id = ?",
            params![id.as_str()],
        )?;
        Ok(())
    }

    fn record_conflict(
        &self,
        note_id: &NoteId,
        local_updated_at: i64,
        remote_updated_at: i64,
        strategy: &str,
    ) -> Result<SyncConflict> {
        let resolved_at = unix_timestamp_millis();
        self.conn.execute(
            "INSERT INTO sync_conflicts (note_id, local_updated_at, remote_updated_at, resolved_at, strategy)
             VALUES (?, ?, ?, ?, ?)",
            params![
                note_id.as_str(),
                local_updated_at,
                remote_updated_at,
                resolved_at,
                strategy
            ],
        )?;

        Ok(SyncConflict {
            id: self.conn.last_insert_rowid(),
            note_id: note_id.to_string(),
            local_updated_at,
            remote_updated_at,
            resolved_at,
            strategy: strategy.to_string(),
        })
    }

    fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, note_id, local_updated_at, remote_updated_at, resolved_at, strategy
             FROM sync_conflicts
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?",
        )?;

        let conflicts = stmt
            .query_map(params![limit as i64], |row| {
                Ok(SyncConflict {
                    id: row.get(0)?,
                    note_id: row.get(1)?,
                    local_updated_at: row.get(2)?,
                    remote_updated_at: row.get(3)?,
                    resolved_at: row.get(4)?,
                    strategy: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }
}
