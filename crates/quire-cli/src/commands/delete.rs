use quire_core::models::SyncOperation;

use crate::app::App;
use crate::commands::common::{normalize_note_identifier, record_change, resolve_note};
use crate::error::CliError;

pub async fn run_delete(id: &str, app: &App) -> Result<(), CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let db = app.open_database()?;
    let note = resolve_note(&normalized_id, &db).await?;

    let tombstone = db.delete_note(&note.id).await?;
    record_change(&db, &tombstone, SyncOperation::Delete).await?;
    println!("{}", note.id);
    Ok(())
}
