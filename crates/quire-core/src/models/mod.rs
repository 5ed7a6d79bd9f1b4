//! Data models for Quire

mod note;
mod sync_conflict;
mod sync_queue;

pub use note::{note_id_from_file_name, remote_file_name, Note, NoteId, NOTE_FILE_SUFFIX};
pub use sync_conflict::SyncConflict;
pub use sync_queue::{SyncOperation, SyncQueueItem};
