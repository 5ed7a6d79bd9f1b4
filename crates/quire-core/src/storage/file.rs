//! Encrypted on-disk secret storage.
//!
//! Used when the OS keychain is unavailable. Each key lives in its own file
//! under the storage directory:
//!
//! - `salt`: 16 random bytes, created once per directory
//! - `<key>.enc`: 12-byte nonce followed by the ChaCha20-Poly1305 ciphertext
//!
//! The file key is derived from a passphrase with Argon2id. The entry name is
//! bound as associated data, so a ciphertext copied under another name fails
//! to decrypt.

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use super::{SecureStorage, StorageError, StorageResult};

/// Passphrase used when none is configured.
pub const DEFAULT_PASSPHRASE: &str = "quire-secure-storage";

/// Argon2id memory cost in KiB (19 MiB)
pub const ARGON2_MEMORY_KB: u32 = 19_456;

/// Argon2id iteration count
pub const ARGON2_ITERATIONS: u32 = 2;

/// Argon2id parallelism
pub const ARGON2_PARALLELISM: u32 = 1;

/// Salt length for key derivation
pub const SALT_LEN: usize = 16;

/// Nonce length for ChaCha20-Poly1305
pub const NONCE_LEN: usize = 12;

const SALT_FILE: &str = "salt";
const ENTRY_EXTENSION: &str = "enc";

/// Secrets encrypted into files under one directory.
pub struct EncryptedFileStorage {
    dir: PathBuf,
    key: Zeroizing<[u8; 32]>,
}

impl fmt::Debug for EncryptedFileStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedFileStorage")
            .field("dir", &self.dir)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl EncryptedFileStorage {
    /// Open (or create) the storage directory and derive the file key.
    pub fn open(dir: impl Into<PathBuf>, passphrase: &str) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|error| io_error(&dir, &error))?;
        let salt = load_or_create_salt(&dir)?;
        let key = derive_key(passphrase.as_bytes(), &salt)?;
        tracing::debug!(dir = %dir.display(), "Opened encrypted file storage");
        Ok(Self { dir, key })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> StorageResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::Backend(format!(
                "invalid secret key name: {key:?}"
            )));
        }
        Ok(self.dir.join(format!("{key}.{ENTRY_EXTENSION}")))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.key.as_slice()))
    }
}

impl SecureStorage for EncryptedFileStorage {
    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let path = self.entry_path(key)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher()
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: value,
                    aad: key.as_bytes(),
                },
            )
            .map_err(|error| StorageError::Backend(format!("encryption failed: {error}")))?;

        let mut contents = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        contents.extend_from_slice(&nonce);
        contents.extend_from_slice(&ciphertext);
        write_atomically(&path, &contents)
    }

    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.entry_path(key)?;
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(io_error(&path, &error)),
        };
        if contents.len() < NONCE_LEN {
            return Err(StorageError::Backend(format!(
                "secret file {} is truncated",
                path.display()
            )));
        }

        let (nonce, ciphertext) = contents.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: key.as_bytes(),
                },
            )
            .map(Some)
            .map_err(|_| {
                StorageError::Backend(format!(
                    "secret file {} failed authentication",
                    path.display()
                ))
            })
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.entry_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(io_error(&path, &error)),
        }
    }
}

fn load_or_create_salt(dir: &Path) -> StorageResult<[u8; SALT_LEN]> {
    let path = dir.join(SALT_FILE);
    match fs::read(&path) {
        Ok(bytes) => bytes.try_into().map_err(|bytes: Vec<u8>| {
            StorageError::Backend(format!(
                "salt file {} has {} bytes, expected {SALT_LEN}",
                path.display(),
                bytes.len()
            ))
        }),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            let mut salt = [0u8; SALT_LEN];
            OsRng.fill_bytes(&mut salt);
            write_atomically(&path, &salt)?;
            Ok(salt)
        }
        Err(error) => Err(io_error(&path, &error)),
    }
}

fn derive_key(passphrase: &[u8], salt: &[u8]) -> StorageResult<Zeroizing<[u8; 32]>> {
    let params = Params::new(
        ARGON2_MEMORY_KB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(32),
    )
    .map_err(|error| StorageError::Backend(format!("invalid Argon2 params: {error}")))?;

    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(passphrase, salt, key.as_mut_slice())
        .map_err(|error| StorageError::Backend(format!("key derivation failed: {error}")))?;
    Ok(key)
}

/// Write to a sibling temp file, then rename over `path`.
fn write_atomically(path: &Path, contents: &[u8]) -> StorageResult<()> {
    let tmp = path.with_extension("tmp");
    let mut file = open_private(&tmp).map_err(|error| io_error(&tmp, &error))?;
    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .map_err(|error| io_error(&tmp, &error))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|error| io_error(path, &error))
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

fn io_error(path: &Path, error: &std::io::Error) -> StorageError {
    StorageError::Backend(format!("{}: {error}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let storage = EncryptedFileStorage::open(dir.path(), "pass").unwrap();
        assert_eq!(storage.get("oauth_token").unwrap(), None);

        storage.put("oauth_token", b"{\"access\":\"t\"}").unwrap();
        let on_disk = fs::read(dir.path().join("oauth_token.enc")).unwrap();
        assert!(!on_disk.windows(6).any(|window| window == b"access"));

        let reopened = EncryptedFileStorage::open(dir.path(), "pass").unwrap();
        assert_eq!(
            reopened.get("oauth_token").unwrap(),
            Some(b"{\"access\":\"t\"}".to_vec())
        );

        reopened.delete("oauth_token").unwrap();
        reopened.delete("oauth_token").unwrap();
        assert_eq!(reopened.get("oauth_token").unwrap(), None);
    }

    #[test]
    fn tampered_file_fails_authentication() {
        let dir = tempfile::tempdir().unwrap();
        let storage = EncryptedFileStorage::open(dir.path(), "pass").unwrap();
        storage.put("user_profile", b"profile").unwrap();

        let path = dir.path().join("user_profile.enc");
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            storage.get("user_profile"),
            Err(StorageError::Backend(_))
        ));
    }

    #[test]
    fn entries_are_bound_to_their_name_and_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let storage = EncryptedFileStorage::open(dir.path(), "pass").unwrap();
        storage.put("oauth_token", b"secret").unwrap();

        fs::copy(
            dir.path().join("oauth_token.enc"),
            dir.path().join("user_profile.enc"),
        )
        .unwrap();
        assert!(storage.get("user_profile").is_err());

        let wrong = EncryptedFileStorage::open(dir.path(), "other").unwrap();
        assert!(wrong.get("oauth_token").is_err());
    }

    #[test]
    fn rejects_path_like_key_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = EncryptedFileStorage::open(dir.path(), "pass").unwrap();
        assert!(storage.put("../escape", b"x").is_err());
        assert!(storage.get("").is_err());
    }
}
