//! Database layer for Quire

mod connection;
mod migrations;
mod queue_repository;
mod repository;
mod sync_state_repository;

pub use connection::Database;
pub use queue_repository::{QueueRepository, SqliteQueueRepository};
pub use repository::{NoteRepository, SqliteNoteRepository};
pub use sync_state_repository::{SqliteSyncStateRepository, SyncStateRepository};
