//! Secure keyed storage for credentials.
//!
//! `KeyringStorage` persists into the OS keychain. `EncryptedFileStorage`
//! replaces it on hosts without a usable keychain. `MemoryStorage` keeps
//! values in process memory and is used by tests and ephemeral sessions.

mod file;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use keyring::Entry;
use thiserror::Error;

pub use file::{EncryptedFileStorage, DEFAULT_PASSPHRASE};

/// Keychain service name used by the default keyring store.
pub const DEFAULT_SERVICE_NAME: &str = "quire";

/// Secure-storage backend failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Secure storage backend error: {0}")]
    Backend(String),

    #[error("Secure storage is unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Byte-oriented keyed secret storage.
pub trait SecureStorage: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Read the value under `key`, `None` when absent.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Remove `key`. Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> StorageResult<()>;
}

/// OS keychain storage backed by the `keyring` crate.
#[derive(Debug, Clone)]
pub struct KeyringStorage {
    service_name: String,
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}

impl KeyringStorage {
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, key: &str) -> StorageResult<Entry> {
        Entry::new(&self.service_name, key).map_err(map_keyring_error)
    }
}

fn map_keyring_error(error: keyring::Error) -> StorageError {
    match error {
        keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
            StorageError::Unavailable(error.to_string())
        }
        other => StorageError::Backend(other.to_string()),
    }
}

impl SecureStorage for KeyringStorage {
    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.entry(key)?.set_secret(value).map_err(map_keyring_error)
    }

    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        match self.entry(key)?.get_secret() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(map_keyring_error(error)),
        }
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(map_keyring_error(error)),
        }
    }
}

/// Key read to check whether a backend is reachable.
const PROBE_KEY: &str = "oauth_token";

/// Use `primary` unless it reports [`StorageError::Unavailable`], in which
/// case the storage built by `fallback` is returned instead.
pub fn with_file_fallback<F>(
    primary: Arc<dyn SecureStorage>,
    fallback: F,
) -> StorageResult<Arc<dyn SecureStorage>>
where
    F: FnOnce() -> StorageResult<EncryptedFileStorage>,
{
    match primary.get(PROBE_KEY) {
        Ok(_) => Ok(primary),
        Err(StorageError::Unavailable(reason)) => {
            let storage = fallback()?;
            tracing::warn!(
                %reason,
                dir = %storage.dir().display(),
                "OS keychain unavailable; using encrypted file storage"
            );
            Ok(Arc::new(storage))
        }
        Err(error) => Err(error),
    }
}

/// In-process secret storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `put` calls fail, simulating a locked keychain.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `get` calls fail, simulating a missing keychain.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Whether any value is stored.
    pub fn is_empty(&self) -> bool {
        self.values
            .lock()
            .map(|values| values.is_empty())
            .unwrap_or(true)
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.values
            .lock()
            .map_err(|error| StorageError::Backend(error.to_string()))
    }
}

impl SecureStorage for MemoryStorage {
    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".to_string()));
        }
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("reads disabled".to_string()));
        }
        Ok(self.lock()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("k").unwrap(), None);

        storage.put("k", b"secret").unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(b"secret".to_vec()));

        storage.put("k", b"replaced").unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(b"replaced".to_vec()));
    }

    #[test]
    fn memory_storage_delete_is_idempotent() {
        let storage = MemoryStorage::new();
        storage.put("k", b"v").unwrap();
        storage.delete("k").unwrap();
        storage.delete("k").unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn memory_storage_write_failures() {
        let storage = MemoryStorage::new();
        storage.set_fail_writes(true);
        assert!(matches!(
            storage.put("k", b"v"),
            Err(StorageError::Unavailable(_))
        ));
        assert_eq!(storage.get("k").unwrap(), None);
    }

    #[test]
    fn unavailable_keychain_falls_back_to_encrypted_files() {
        let dir = tempfile::tempdir().unwrap();
        let keychain = Arc::new(MemoryStorage::new());
        keychain.set_fail_reads(true);

        let storage = with_file_fallback(keychain.clone(), || {
            EncryptedFileStorage::open(dir.path(), DEFAULT_PASSPHRASE)
        })
        .unwrap();
        storage.put("oauth_token", b"token").unwrap();

        assert!(keychain.is_empty());
        assert!(dir.path().join("oauth_token.enc").exists());
        assert_eq!(storage.get("oauth_token").unwrap(), Some(b"token".to_vec()));
    }

    #[test]
    fn working_keychain_is_kept() {
        let keychain = Arc::new(MemoryStorage::new());
        let storage = with_file_fallback(keychain.clone(), || {
            Err(StorageError::Backend("fallback should not be opened".to_string()))
        })
        .unwrap();
        storage.put("oauth_token", b"token").unwrap();
        assert!(!keychain.is_empty());
    }
}
