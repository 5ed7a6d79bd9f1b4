pub mod add;
pub mod auth_cmd;
pub mod common;
pub mod completions;
pub mod delete;
pub mod edit;
pub mod list;
pub mod sync;

use crate::app::App;
use crate::cli::NoteCommands;
use crate::error::CliError;

pub async fn run_note(command: NoteCommands, app: &App) -> Result<(), CliError> {
    match command {
        NoteCommands::Add { title, content } => add::run_add(title.as_deref(), &content, app).await,
        NoteCommands::Edit { id, title, content } => {
            edit::run_edit(&id, title.as_deref(), &content, app).await
        }
        NoteCommands::Delete { id } => delete::run_delete(&id, app).await,
        NoteCommands::List { limit, json } => list::run_list(limit, json, app).await,
    }
}
