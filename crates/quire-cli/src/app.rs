use std::path::{Path, PathBuf};
use std::sync::Arc;

use quire_core::auth::{CredentialStore, OAuthClient, SessionManager};
use quire_core::config::QuireConfig;
use quire_core::remote::{GoogleDriveStore, RemoteStore};
use quire_core::services::DatabaseService;
use quire_core::storage::{
    with_file_fallback, EncryptedFileStorage, KeyringStorage, SecureStorage,
};
use quire_core::sync::{RemotePuller, SyncQueue};
use tokio_util::sync::CancellationToken;

use crate::error::CliError;

const APP_DIR: &str = "quire";

/// Resolved configuration plus the handles every command needs.
pub struct App {
    config: QuireConfig,
    db_path: PathBuf,
    storage: Arc<dyn SecureStorage>,
    remote: Option<Arc<dyn RemoteStore>>,
}

/// Everything a sync command runs against, wired to one shutdown token.
pub struct SyncContext {
    pub oauth: OAuthClient,
    pub session: Arc<SessionManager>,
    pub queue: Arc<SyncQueue>,
    pub puller: RemotePuller,
    pub shutdown: CancellationToken,
}

impl SyncContext {
    /// Cancel background work and wait for it to finish.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.queue.stop().await;
        self.session.stop().await;
    }
}

impl App {
    /// Read the config file and `QUIRE_*` overrides. Validation is deferred
    /// to commands that talk to the provider, so local note commands work
    /// before sync is configured.
    pub fn load(config_path: Option<PathBuf>, db_path: Option<PathBuf>) -> Result<Self, CliError> {
        let config_path = match config_path {
            Some(path) => path,
            None => default_config_path()?,
        };
        let mut config = QuireConfig::from_file(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;

        let db_path = match db_path.or_else(|| config.database_path.clone()) {
            Some(path) => path,
            None => default_db_path()?,
        };

        let secrets_dir = match config.secrets_dir.clone() {
            Some(dir) => dir,
            None => default_secrets_dir()?,
        };
        let storage = with_file_fallback(Arc::new(KeyringStorage::default()), || {
            EncryptedFileStorage::open(secrets_dir, config.storage_passphrase())
        })?;

        Ok(Self::new(config, db_path, storage))
    }

    pub fn new(config: QuireConfig, db_path: PathBuf, storage: Arc<dyn SecureStorage>) -> Self {
        Self {
            config,
            db_path,
            storage,
            remote: None,
        }
    }

    /// Use `remote` instead of the Drive adapter built from config.
    #[cfg(test)]
    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub const fn config(&self) -> &QuireConfig {
        &self.config
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn open_database(&self) -> Result<DatabaseService, CliError> {
        Ok(DatabaseService::open_path(&self.db_path)?)
    }

    pub fn credentials(&self) -> CredentialStore {
        CredentialStore::new(self.storage.clone())
    }

    pub async fn sync_context(&self) -> Result<SyncContext, CliError> {
        self.config.validate()?;

        let db = self.open_database()?;
        let oauth = OAuthClient::new(self.config.oauth_config())?;
        let shutdown = CancellationToken::new();
        let session = SessionManager::new(
            Arc::new(oauth.clone()),
            self.credentials(),
            self.config.session_config(),
            shutdown.clone(),
        );
        let remote: Arc<dyn RemoteStore> = match &self.remote {
            Some(remote) => remote.clone(),
            None => Arc::new(GoogleDriveStore::with_base_urls(
                self.config.drive_api_base.clone(),
                self.config.drive_upload_base.clone(),
            )?),
        };

        let store = Arc::new(db.clone());
        let queue = SyncQueue::restore(
            store.clone(),
            remote.clone(),
            session.clone(),
            self.config.queue_config(),
        )
        .await?;
        let puller = RemotePuller::new(
            store,
            remote,
            session.clone(),
            queue.clone(),
            self.config.resolver(),
        );

        Ok(SyncContext {
            oauth,
            session,
            queue,
            puller,
            shutdown,
        })
    }
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join("config.json"))
        .ok_or(CliError::MissingDirectory("config"))
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR).join("quire.db"))
        .ok_or(CliError::MissingDirectory("data"))
}

pub fn default_secrets_dir() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR).join("secrets"))
        .ok_or(CliError::MissingDirectory("data"))
}
