//! Note repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use crate::error::{Error, Result};
use crate::models::{Note, NoteId};
use crate::util::unix_timestamp_millis;
use rusqlite::{params, Connection, OptionalExtension};

const NOTE_COLUMNS: &str = "id, workspace_id, title, content, parent_id, is_favorite, is_deleted, created_at, updated_at, deleted_at";

/// Trait for note storage operations
pub trait NoteRepository {
    /// Create a new note
    fn create(&self, workspace_id: &str, title: &str, content: &str) -> Result<Note>;

    /// Get a live note by ID
    fn get(&self, id: &NoteId) -> Result<Option<Note>>;

    /// Get a note by ID, including soft-deleted tombstones
    fn get_any(&self, id: &NoteId) -> Result<Option<Note>>;

    /// List notes (excluding deleted), newest first
    fn list(&self, limit: usize, offset: usize) -> Result<Vec<Note>>;

    /// Update a note's title and/or content
    fn update(&self, id: &NoteId, title: Option<&str>, content: Option<&str>) -> Result<Note>;

    /// Soft delete a note, returning the tombstone
    fn delete(&self, id: &NoteId) -> Result<Note>;

    /// Insert or fully replace a note, keeping its timestamps as given
    fn save(&self, note: &Note) -> Result<()>;
}

/// `SQLite` implementation of `NoteRepository`
pub struct SqliteNoteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteNoteRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a note from a database row
    fn parse_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
        let id: String = row.get(0)?;
        let parent_id: Option<String> = row.get(4)?;
        Ok(Note {
            id: parse_id(0, &id)?,
            workspace_id: row.get(1)?,
            title: row.get(2)?,
            content: row.get(3)?,
            parent_id: parent_id.as_deref().map(|value| parse_id(4, value)).transpose()?,
            is_favorite: row.get::<_, i32>(5)? != 0,
            is_deleted: row.get::<_, i32>(6)? != 0,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            deleted_at: row.get(9)?,
        })
    }

    fn query_one(&self, sql: &str, id: &NoteId) -> Result<Option<Note>> {
        let note = self
            .conn
            .query_row(sql, params![id.as_str()], Self::parse_note)
            .optional()?;
        Ok(note)
    }
}

fn parse_id(column: usize, value: &str) -> rusqlite::Result<NoteId> {
    value.parse().map_err(|error: uuid::Error| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(error),
        )
    })
}

impl NoteRepository for SqliteNoteRepository<'_> {
    fn create(&self, workspace_id: &str, title: &str, content: &str) -> Result<Note> {
        let note = Note::new(workspace_id, title, content);
        self.save(&note)?;
        Ok(note)
    }

    fn get(&self, id: &NoteId) -> Result<Option<Note>> {
        self.query_one(
            &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ? AND is_deleted = 0"),
            id,
        )
    }

    fn get_any(&self, id: &NoteId) -> Result<Option<Note>> {
        self.query_one(&format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?"), id)
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<Note>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NOTE_COLUMNS}
             FROM notes
             WHERE is_deleted = 0
             ORDER BY updated_at DESC
             LIMIT ? OFFSET ?"
        ))?;

        let notes = stmt
            .query_map(params![limit as i64, offset as i64], Self::parse_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(notes)
    }

    fn update(&self, id: &NoteId, title: Option<&str>, content: Option<&str>) -> Result<Note> {
        let rows = self.conn.execute(
            "UPDATE notes
             SET title = COALESCE(?, title), content = COALESCE(?, content), updated_at = ?
             WHERE id = ? AND is_deleted = 0",
            params![title, content, unix_timestamp_millis(), id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        self.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn delete(&self, id: &NoteId) -> Result<Note> {
        let now = unix_timestamp_millis();

        let rows = self.conn.execute(
            "UPDATE notes SET is_deleted = 1, deleted_at = ?, updated_at = ? WHERE id = ? AND is_deleted = 0",
            params![now, now, id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        self.get_any(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn save(&self, note: &Note) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO notes ({NOTE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    workspace_id = excluded.workspace_id,
                    title = excluded.title,
                    content = excluded.content,
                    parent_id = excluded.parent_id,
                    is_favorite = excluded.is_favorite,
                    is_deleted = excluded.is_deleted,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    deleted_at = excluded.deleted_at"
            ),
            params![
                note.id.as_str(),
                note.workspace_id,
                note.title,
                note.content,
                note.parent_id.map(|id| id.as_str()),
                i32::from(note.is_favorite),
                i32::from(note.is_deleted),
                note.created_at,
                note.updated_at,
                note.deleted_at,
            ],
        )?;
        Ok(())
    }
}
