use crate::app::App;
use crate::commands::common::{format_note_lines, note_to_list_item, NoteListItem};
use crate::error::CliError;

pub async fn run_list(limit: usize, as_json: bool, app: &App) -> Result<(), CliError> {
    let notes = app.open_database()?.list_notes(limit, 0).await?;

    if as_json {
        let json_items = notes
            .iter()
            .map(note_to_list_item)
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if notes.is_empty() {
        println!("No notes yet.");
    } else {
        for line in format_note_lines(&notes) {
            println!("{line}");
        }
    }

    Ok(())
}
