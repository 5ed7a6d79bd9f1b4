use quire_core::models::SyncOperation;

use crate::app::App;
use crate::commands::common::{
    capture_editor_input_with_initial, normalize_content, normalize_note_identifier,
    record_change, resolve_note,
};
use crate::error::CliError;

pub async fn run_edit(
    id: &str,
    title: Option<&str>,
    content_parts: &[String],
    app: &App,
) -> Result<(), CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let db = app.open_database()?;
    let note = resolve_note(&normalized_id, &db).await?;

    let title = title.and_then(normalize_content);
    let content = match normalize_content(&content_parts.join(" ")) {
        Some(content) => Some(content),
        // A title-only edit leaves the body alone.
        None if title.is_some() => None,
        None => Some(
            capture_editor_input_with_initial(&note.content)?
                .ok_or(CliError::EmptyEditedContent)?,
        ),
    };

    let title_changed = title.as_ref().is_some_and(|t| *t != note.title);
    let content_changed = content.as_ref().is_some_and(|c| *c != note.content);
    if !title_changed && !content_changed {
        println!("{}", note.id);
        return Ok(());
    }

    let updated = db
        .update_note(&note.id, title.as_deref(), content.as_deref())
        .await?;
    record_change(&db, &updated, SyncOperation::Update).await?;
    println!("{}", updated.id);
    Ok(())
}
