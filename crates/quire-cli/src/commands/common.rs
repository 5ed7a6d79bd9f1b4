use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use quire_core::models::{SyncOperation, SyncQueueItem};
use quire_core::services::{DatabaseService, QueueStore};
use quire_core::util::{monotonic_nanos, normalize_text_option};
use quire_core::{Note, NoteId};
use serde::Serialize;

use crate::error::CliError;

/// Workspace used for notes created from the command line.
pub const CLI_WORKSPACE: &str = "default";

const TITLE_MAX_CHARS: usize = 60;
const PREFIX_PAGE_SIZE: usize = 500;

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub content: String,
    pub is_favorite: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
}

pub fn note_to_list_item(note: &Note) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();
    NoteListItem {
        id: note.id.to_string(),
        title: note.title.clone(),
        preview: note_preview(note, 80),
        content: note.content.clone(),
        is_favorite: note.is_favorite,
        created_at: note.created_at,
        updated_at: note.updated_at,
        relative_time: format_relative_time(note.updated_at, now_ms),
    }
}

pub fn format_note_lines(notes: &[Note]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let id = note.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let title = truncate_chars(&note.title, 24);
            let preview = note_preview(note, 40);
            let relative_time = format_relative_time(note.updated_at, now_ms);
            format!("{short_id:<13}  {title:<24}  {preview:<40}  {relative_time}")
        })
        .collect()
}

pub fn note_preview(note: &Note, max_chars: usize) -> String {
    let first_line = note.content.lines().next().unwrap_or("").trim();
    truncate_chars(first_line, max_chars)
}

/// Collapse whitespace and cut to `max_chars`, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

/// Explicit title when given, otherwise the first line of content.
pub fn derive_title(title: Option<&str>, content: &str) -> String {
    if let Some(title) = title.and_then(|t| normalize_text_option(Some(t.to_string()))) {
        return title;
    }
    let first_line = content.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    truncate_chars(first_line.trim_start_matches('#'), TITLE_MAX_CHARS)
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// Durably queue `note` for upload. The next `quire sync push` or a running
/// `quire sync watch` picks it up.
pub async fn record_change(
    db: &DatabaseService,
    note: &Note,
    operation: SyncOperation,
) -> Result<(), CliError> {
    let item = SyncQueueItem::new(note.id, operation, note)?;
    db.append(&item).await?;
    tracing::debug!(note_id = %note.id, %operation, "Queued note change for sync");
    Ok(())
}

/// Find a live note by full id or a unique id prefix.
pub async fn resolve_note(note_query: &str, db: &DatabaseService) -> Result<Note, CliError> {
    if let Ok(note_id) = note_query.parse::<NoteId>() {
        if let Some(note) = db.get_note(&note_id).await? {
            return Ok(note);
        }
    }

    let mut matches = Vec::new();
    let mut offset = 0usize;
    loop {
        let batch = db.list_notes(PREFIX_PAGE_SIZE, offset).await?;
        let count = batch.len();
        matches.extend(
            batch
                .into_iter()
                .filter(|note| note.id.to_string().starts_with(note_query)),
        );
        if count < PREFIX_PAGE_SIZE || matches.len() > 1 {
            break;
        }
        offset += count;
    }

    match matches.len() {
        0 => Err(CliError::NoteNotFound(note_query.to_string())),
        1 => Ok(matches.remove(0)),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|note| note.id.to_string().chars().take(13).collect::<String>())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousNoteId(format!(
                "ID prefix '{note_query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn resolve_note_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input_with_initial("")? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_note_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyNoteId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_note_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let note_content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&note_content))
}

fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    // EDITOR may carry arguments, e.g. "code --wait".
    let mut parts = editor.split_whitespace();
    let Some(program) = parts.next() else {
        return Err(CliError::EditorFailed("empty EDITOR command".into()));
    };

    let status = Command::new(program).args(parts).arg(file_path).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(CliError::EditorFailed(format!(
            "`{editor}` exited with status {status}"
        )))
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

fn create_temp_note_file_path() -> PathBuf {
    env::temp_dir().join(format!(
        "quire-note-{}-{}.md",
        std::process::id(),
        monotonic_nanos()
    ))
}
