use quire_core::models::SyncOperation;

use crate::app::App;
use crate::commands::common::{derive_title, record_change, resolve_note_content, CLI_WORKSPACE};
use crate::error::CliError;

pub async fn run_add(
    title: Option<&str>,
    content_parts: &[String],
    app: &App,
) -> Result<(), CliError> {
    let content = resolve_note_content(content_parts)?;
    let title = derive_title(title, &content);

    let db = app.open_database()?;
    let note = db.create_note(CLI_WORKSPACE, &title, &content).await?;
    record_change(&db, &note, SyncOperation::Create).await?;

    println!("{}", note.id);
    Ok(())
}
