//! Remote object store capability and its implementations.

mod drive;
mod memory;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

pub use drive::{GoogleDriveStore, DRIVE_API_BASE, DRIVE_UPLOAD_BASE};
pub use memory::MemoryRemoteStore;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote store configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote store rejected the access token: {0}")]
    Unauthorized(String),
    #[error("Remote store API error: {0}")]
    Api(String),
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

impl RemoteError {
    pub(crate) fn from_status(status: StatusCode, body: &str) -> Self {
        let message = crate::util::compact_text(body);
        let message = if message.is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            format!("{message} ({})", status.as_u16())
        };
        if status == StatusCode::UNAUTHORIZED {
            Self::Unauthorized(message)
        } else {
            Self::Api(message)
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// A file in the remote app folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    /// RFC 3339, when the backend reports it
    pub modified_time: Option<String>,
}

/// Backend-neutral file listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Only files directly inside this folder
    pub folder_id: String,
    /// Only files whose name contains this text
    pub name_contains: Option<String>,
}

impl ListQuery {
    pub fn in_folder(folder_id: impl Into<String>) -> Self {
        Self {
            folder_id: folder_id.into(),
            name_contains: None,
        }
    }

    #[must_use]
    pub fn name_contains(mut self, text: impl Into<String>) -> Self {
        self.name_contains = Some(text.into());
        self
    }

    pub fn matches_name(&self, name: &str) -> bool {
        match &self.name_contains {
            Some(text) => name.contains(text.as_str()),
            None => true,
        }
    }
}

/// Folder-scoped object store. Every call carries the bearer access token.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Find the folder named `name`, creating it when absent. Returns its id.
    async fn create_folder(&self, access_token: &str, name: &str) -> RemoteResult<String>;

    /// Write `content` to `name` inside the folder, replacing an existing file
    /// of the same name. Returns the file id.
    async fn upload(
        &self,
        access_token: &str,
        folder_id: &str,
        name: &str,
        content: &[u8],
    ) -> RemoteResult<String>;

    async fn download(&self, access_token: &str, file_id: &str) -> RemoteResult<Vec<u8>>;

    /// Metadata of every non-trashed file matching `query`.
    async fn list(&self, access_token: &str, query: &ListQuery) -> RemoteResult<Vec<RemoteFile>>;

    /// Delete `name` from the folder. Returns whether a file was removed.
    async fn remove(&self, access_token: &str, folder_id: &str, name: &str) -> RemoteResult<bool>;
}
