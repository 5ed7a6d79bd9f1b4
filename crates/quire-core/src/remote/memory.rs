//! In-process remote store with failure injection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{ListQuery, RemoteError, RemoteFile, RemoteResult, RemoteStore};

#[derive(Debug, Default)]
struct Folder {
    name: String,
    files: BTreeMap<String, Vec<u8>>,
}

/// Folders and files held in memory. Useful offline and as a test double.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    folders: Mutex<BTreeMap<String, Folder>>,
    fail_next: AtomicU32,
    uploads: AtomicU32,
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail with an API error.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Successful uploads so far.
    pub fn upload_count(&self) -> u32 {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Contents of `name` in the folder called `folder_name`.
    pub fn file(&self, folder_name: &str, name: &str) -> Option<Vec<u8>> {
        self.lock()
            .values()
            .find(|folder| folder.name == folder_name)
            .and_then(|folder| folder.files.get(name).cloned())
    }

    /// Write a file directly, creating the folder if needed.
    pub fn put_file(&self, folder_name: &str, name: &str, content: &[u8]) {
        let mut folders = self.lock();
        let id = folder_id_for(folder_name);
        folders
            .entry(id)
            .or_insert_with(|| Folder {
                name: folder_name.to_string(),
                files: BTreeMap::new(),
            })
            .files
            .insert(name.to_string(), content.to_vec());
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Folder>> {
        self.folders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_failure(&self) -> RemoteResult<()> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if injected.is_ok() {
            return Err(RemoteError::Api("injected failure (503)".to_string()));
        }
        Ok(())
    }
}

fn folder_id_for(name: &str) -> String {
    format!("folder:{name}")
}

fn file_id_for(folder_id: &str, name: &str) -> String {
    format!("{folder_id}/{name}")
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create_folder(&self, _access_token: &str, name: &str) -> RemoteResult<String> {
        self.check_failure()?;
        let id = folder_id_for(name);
        self.lock().entry(id.clone()).or_insert_with(|| Folder {
            name: name.to_string(),
            files: BTreeMap::new(),
        });
        Ok(id)
    }

    async fn upload(
        &self,
        _access_token: &str,
        folder_id: &str,
        name: &str,
        content: &[u8],
    ) -> RemoteResult<String> {
        self.check_failure()?;
        let mut folders = self.lock();
        let folder = folders
            .get_mut(folder_id)
            .ok_or_else(|| RemoteError::Api(format!("folder not found: {folder_id} (404)")))?;
        folder.files.insert(name.to_string(), content.to_vec());
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(file_id_for(folder_id, name))
    }

    async fn download(&self, _access_token: &str, file_id: &str) -> RemoteResult<Vec<u8>> {
        self.check_failure()?;
        let (folder_id, name) = file_id
            .split_once('/')
            .ok_or_else(|| RemoteError::InvalidPayload(format!("bad file id: {file_id}")))?;
        self.lock()
            .get(folder_id)
            .and_then(|folder| folder.files.get(name).cloned())
            .ok_or_else(|| RemoteError::Api(format!("file not found: {file_id} (404)")))
    }

    async fn list(&self, _access_token: &str, query: &ListQuery) -> RemoteResult<Vec<RemoteFile>> {
        self.check_failure()?;
        let folder_id = query.folder_id.as_str();
        Ok(self
            .lock()
            .get(folder_id)
            .map(|folder| {
                folder
                    .files
                    .keys()
                    .filter(|name| query.matches_name(name))
                    .map(|name| RemoteFile {
                        id: file_id_for(folder_id, name),
                        name: name.clone(),
                        modified_time: None,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove(&self, _access_token: &str, folder_id: &str, name: &str) -> RemoteResult<bool> {
        self.check_failure()?;
        Ok(self
            .lock()
            .get_mut(folder_id)
            .is_some_and(|folder| folder.files.remove(name).is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn upload_list_download_remove() {
        let store = MemoryRemoteStore::new();
        let folder = store.create_folder("t", "Quire").await.unwrap();
        assert_eq!(store.create_folder("t", "Quire").await.unwrap(), folder);

        let id = store.upload("t", &folder, "a.json", b"1").await.unwrap();
        store.upload("t", &folder, "a.json", b"2").await.unwrap();

        store.upload("t", &folder, "notes.txt", b"x").await.unwrap();

        let files = store.list("t", &ListQuery::in_folder(&folder)).await.unwrap();
        assert_eq!(files.len(), 2);
        let json = store
            .list("t", &ListQuery::in_folder(&folder).name_contains(".json"))
            .await
            .unwrap();
        assert_eq!(json.len(), 1);
        assert_eq!(json[0].name, "a.json");
        assert_eq!(store.download("t", &id).await.unwrap(), b"2");
        assert_eq!(store.file("Quire", "a.json"), Some(b"2".to_vec()));

        assert!(store.remove("t", &folder, "a.json").await.unwrap());
        assert!(!store.remove("t", &folder, "a.json").await.unwrap());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryRemoteStore::new();
        store.fail_next(2);
        assert!(store.create_folder("t", "Quire").await.is_err());
        assert!(store.create_folder("t", "Quire").await.is_err());
        assert!(store.create_folder("t", "Quire").await.is_ok());
    }
}
