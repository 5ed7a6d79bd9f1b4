//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::util::unix_timestamp_millis;

/// A unique identifier for a note, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteId(Uuid);

impl NoteId {
    /// Create a new unique note ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A note in a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier
    pub id: NoteId,
    /// Owning workspace
    pub workspace_id: String,
    /// Note title
    pub title: String,
    /// Markdown content
    pub content: String,
    /// Parent note for nested pages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NoteId>,
    /// Pinned to favorites
    #[serde(default)]
    pub is_favorite: bool,
    /// Soft delete flag for sync
    #[serde(default)]
    pub is_deleted: bool,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Soft delete timestamp (Unix ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl Note {
    /// Create a new note in the given workspace
    #[must_use]
    pub fn new(
        workspace_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = unix_timestamp_millis();
        Self {
            id: NoteId::new(),
            workspace_id: workspace_id.into(),
            title: title.into(),
            content: content.into(),
            parent_id: None,
            is_favorite: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Whether title and content match another version of the note
    #[must_use]
    pub fn same_text(&self, other: &Self) -> bool {
        self.title == other.title && self.content == other.content
    }

    /// Remote object name used when this note is uploaded
    #[must_use]
    pub fn remote_file_name(&self) -> String {
        remote_file_name(&self.id)
    }
}

/// Suffix of every remote note object
pub const NOTE_FILE_SUFFIX: &str = ".json";

/// Remote object name for a note id.
#[must_use]
pub fn remote_file_name(id: &NoteId) -> String {
    format!("{id}{NOTE_FILE_SUFFIX}")
}

/// Parse a note id back out of a remote object name.
#[must_use]
pub fn note_id_from_file_name(name: &str) -> Option<NoteId> {
    name.strip_suffix(NOTE_FILE_SUFFIX)?.parse().ok()
}
