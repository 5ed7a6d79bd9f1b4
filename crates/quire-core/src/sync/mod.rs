//! Local-to-remote synchronization: the durable push queue, remote pull and
//! the conflict resolver they share.

mod conflict;
mod pull;
mod queue;

use thiserror::Error;

use crate::auth::AuthError;
use crate::remote::RemoteError;

pub use conflict::{detect_conflict, ConflictResolver, ConflictStrategy};
pub use pull::{PullReport, RemotePuller};
pub use queue::{DrainOutcome, DroppedItem, QueueStatus, SyncQueue, SyncQueueConfig};

/// Default name of the remote folder that holds note files.
pub const DEFAULT_APP_FOLDER: &str = "Quire";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Core(#[from] crate::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Failed to serialize sync payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Note {0} no longer exists locally")]
    MissingRecord(String),
    #[error("Unknown conflict strategy: {0}")]
    UnknownStrategy(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
