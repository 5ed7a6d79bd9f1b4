//! Sync queue item model

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::NoteId;
use crate::util::{monotonic_nanos, unix_timestamp_millis};

/// Kind of local mutation waiting to be pushed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown sync operation: {other}")),
        }
    }
}

/// A pending mutation in the sync queue.
///
/// `retries` only ever grows while the item is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// `{note_id}-{nanos}`, unique and roughly enqueue-ordered
    pub id: String,
    /// Target note
    pub note_id: NoteId,
    /// Mutation kind
    pub operation: SyncOperation,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Failed processing attempts so far
    pub retries: u32,
    /// JSON snapshot captured at enqueue time
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
}

impl SyncQueueItem {
    /// Build a new item, serializing `payload` as JSON.
    pub fn new<T: Serialize + ?Sized>(
        note_id: NoteId,
        operation: SyncOperation,
        payload: &T,
    ) -> serde_json::Result<Self> {
        let payload = serde_json::to_vec(payload)?;
        Ok(Self {
            id: format!("{note_id}-{}", monotonic_nanos()),
            note_id,
            operation,
            enqueued_at: unix_timestamp_millis(),
            retries: 0,
            payload,
        })
    }

    /// Decode the JSON snapshot captured at enqueue time.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}
