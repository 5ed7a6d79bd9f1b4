//! Google Drive v3 REST adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::{ListQuery, RemoteError, RemoteFile, RemoteResult, RemoteStore};
use crate::util::is_http_url;

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const NOTE_MIME_TYPE: &str = "application/json";
const LIST_PAGE_SIZE: &str = "1000";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct GoogleDriveStore {
    api_base: String,
    upload_base: String,
    client: Client,
}

impl GoogleDriveStore {
    pub fn new() -> RemoteResult<Self> {
        Self::with_base_urls(DRIVE_API_BASE, DRIVE_UPLOAD_BASE)
    }

    /// Point the adapter at alternative endpoints (proxies, test servers).
    pub fn with_base_urls(
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
    ) -> RemoteResult<Self> {
        let api_base = normalize_base(api_base.into())?;
        let upload_base = normalize_base(upload_base.into())?;
        Ok(Self {
            api_base,
            upload_base,
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
        })
    }

    async fn query_files(&self, access_token: &str, query: &str) -> RemoteResult<Vec<RemoteFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", query.to_string()),
                ("spaces", "drive".to_string()),
                (
                    "fields",
                    "nextPageToken,files(id,name,modifiedTime)".to_string(),
                ),
                ("pageSize", LIST_PAGE_SIZE.to_string()),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }

            let response = self
                .client
                .get(format!("{}/files", self.api_base))
                .bearer_auth(access_token)
                .query(&params)
                .send()
                .await?;
            let page = check(response).await?.json::<FileList>().await?;

            files.extend(page.files.into_iter().map(Into::into));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(files),
            }
        }
    }

    async fn find_file(
        &self,
        access_token: &str,
        folder_id: &str,
        name: &str,
    ) -> RemoteResult<Option<RemoteFile>> {
        let query = format!(
            "name='{}' and '{}' in parents and trashed=false",
            escape_query(name),
            escape_query(folder_id)
        );
        Ok(self.query_files(access_token, &query).await?.into_iter().next())
    }

    async fn create_metadata(
        &self,
        access_token: &str,
        body: serde_json::Value,
    ) -> RemoteResult<String> {
        let response = self
            .client
            .post(format!("{}/files", self.api_base))
            .bearer_auth(access_token)
            .query(&[("fields", "id")])
            .json(&body)
            .send()
            .await?;
        let created = check(response).await?.json::<DriveFile>().await?;
        Ok(created.id)
    }
}

fn normalize_base(value: String) -> RemoteResult<String> {
    let trimmed = value.trim().trim_end_matches('/');
    if !is_http_url(trimmed) {
        return Err(RemoteError::InvalidConfiguration(format!(
            "Drive base URL must include http:// or https://: {trimmed}"
        )));
    }
    Ok(trimmed.to_string())
}

/// Quote a literal for the Drive `q` query language.
fn drive_query(query: &ListQuery) -> String {
    let mut clauses = vec![format!(
        "'{}' in parents",
        escape_query(&query.folder_id)
    )];
    if let Some(text) = &query.name_contains {
        clauses.push(format!("name contains '{}'", escape_query(text)));
    }
    clauses.push("trashed=false".to_string());
    clauses.join(" and ")
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

async fn check(response: Response) -> RemoteResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::from_status(status, &body))
}

#[async_trait]
impl RemoteStore for GoogleDriveStore {
    async fn create_folder(&self, access_token: &str, name: &str) -> RemoteResult<String> {
        let query = format!(
            "name='{}' and mimeType='{FOLDER_MIME_TYPE}' and trashed=false",
            escape_query(name)
        );
        if let Some(existing) = self.query_files(access_token, &query).await?.into_iter().next() {
            return Ok(existing.id);
        }

        let id = self
            .create_metadata(
                access_token,
                serde_json::json!({ "name": name, "mimeType": FOLDER_MIME_TYPE }),
            )
            .await?;
        tracing::info!(folder = name, folder_id = %id, "Created remote app folder");
        Ok(id)
    }

    async fn upload(
        &self,
        access_token: &str,
        folder_id: &str,
        name: &str,
        content: &[u8],
    ) -> RemoteResult<String> {
        let file_id = match self.find_file(access_token, folder_id, name).await? {
            Some(existing) => existing.id,
            None => {
                self.create_metadata(
                    access_token,
                    serde_json::json!({
                        "name": name,
                        "parents": [folder_id],
                        "mimeType": NOTE_MIME_TYPE,
                    }),
                )
                .await?
            }
        };

        let response = self
            .client
            .patch(format!("{}/files/{file_id}", self.upload_base))
            .bearer_auth(access_token)
            .query(&[("uploadType", "media")])
            .header(reqwest::header::CONTENT_TYPE, NOTE_MIME_TYPE)
            .body(content.to_vec())
            .send()
            .await?;
        check(response).await?;
        tracing::debug!(name, file_id = %file_id, bytes = content.len(), "Uploaded remote file");
        Ok(file_id)
    }

    async fn download(&self, access_token: &str, file_id: &str) -> RemoteResult<Vec<u8>> {
        let response = self
            .client
            .get(format!("{}/files/{file_id}", self.api_base))
            .bearer_auth(access_token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        Ok(check(response).await?.bytes().await?.to_vec())
    }

    async fn list(&self, access_token: &str, query: &ListQuery) -> RemoteResult<Vec<RemoteFile>> {
        self.query_files(access_token, &drive_query(query)).await
    }

    async fn remove(&self, access_token: &str, folder_id: &str, name: &str) -> RemoteResult<bool> {
        let Some(file) = self.find_file(access_token, folder_id, name).await? else {
            return Ok(false);
        };

        let response = self
            .client
            .delete(format!("{}/files/{}", self.api_base, file.id))
            .bearer_auth(access_token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response).await?;
        tracing::debug!(name, file_id = %file.id, "Removed remote file");
        Ok(true)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    modified_time: Option<String>,
}

impl From<DriveFile> for RemoteFile {
    fn from(value: DriveFile) -> Self {
        Self {
            id: value.id,
            name: value.name,
            modified_time: value.modified_time,
        }
    }
}
