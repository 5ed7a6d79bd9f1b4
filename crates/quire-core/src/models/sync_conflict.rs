//! Sync conflict model

use serde::{Deserialize, Serialize};

/// Recorded sync conflict and the strategy that resolved it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Note involved in the conflict
    pub note_id: String,
    /// Local version's timestamp when the conflict was detected
    pub local_updated_at: i64,
    /// Remote version's timestamp when the conflict was detected
    pub remote_updated_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
