//! Runtime configuration.
//!
//! `QuireConfig` is read from a JSON file when one exists and then overridden
//! by `QUIRE_*` variables. Overrides go through a lookup function so callers
//! can feed them from the process environment, a `.env` file or a test map.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{
    OAuthConfig, SessionConfig, DEFAULT_LOOPBACK_PORT, GOOGLE_AUTH_URL, GOOGLE_SCOPES,
    GOOGLE_TOKEN_URL,
};
use crate::remote::{DRIVE_API_BASE, DRIVE_UPLOAD_BASE};
use crate::storage::DEFAULT_PASSPHRASE;
use crate::sync::{ConflictResolver, ConflictStrategy, SyncQueueConfig, DEFAULT_APP_FOLDER};
use crate::util::{is_http_url, normalize_text_option};

pub const ENV_PREFIX: &str = "QUIRE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct QuireConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub loopback_port: u16,
    pub app_folder: String,
    pub conflict_strategy: ConflictStrategy,
    pub drain_interval_secs: u64,
    pub retry_ceiling: u32,
    pub database_path: Option<PathBuf>,
    pub drive_api_base: String,
    pub drive_upload_base: String,
    /// Directory for encrypted credential files when the OS keychain is
    /// unavailable
    pub secrets_dir: Option<PathBuf>,
    pub storage_passphrase: Option<String>,
}

impl Default for QuireConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            loopback_port: DEFAULT_LOOPBACK_PORT,
            app_folder: DEFAULT_APP_FOLDER.to_string(),
            conflict_strategy: ConflictStrategy::default(),
            drain_interval_secs: 5,
            retry_ceiling: 3,
            database_path: None,
            drive_api_base: DRIVE_API_BASE.to_string(),
            drive_upload_base: DRIVE_UPLOAD_BASE.to_string(),
            secrets_dir: None,
            storage_passphrase: None,
        }
    }
}

impl QuireConfig {
    /// Parse `path`, or return defaults when the file does not exist.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file; using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` (if present), apply process environment overrides and
    /// validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `QUIRE_*` keys. Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| normalize_text_option(lookup(&format!("{ENV_PREFIX}{name}")));

        if let Some(value) = get("CLIENT_ID") {
            self.client_id = Some(value);
        }
        if let Some(value) = get("CLIENT_SECRET") {
            self.client_secret = Some(value);
        }
        if let Some(value) = get("AUTH_URL") {
            self.auth_url = value;
        }
        if let Some(value) = get("TOKEN_URL") {
            self.token_url = value;
        }
        if let Some(value) = get("LOOPBACK_PORT") {
            self.loopback_port = parse_value("LOOPBACK_PORT", &value)?;
        }
        if let Some(value) = get("APP_FOLDER") {
            self.app_folder = value;
        }
        if let Some(value) = get("CONFLICT_STRATEGY") {
            self.conflict_strategy = parse_value("CONFLICT_STRATEGY", &value)?;
        }
        if let Some(value) = get("DRAIN_INTERVAL_SECS") {
            self.drain_interval_secs = parse_value("DRAIN_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = get("RETRY_CEILING") {
            self.retry_ceiling = parse_value("RETRY_CEILING", &value)?;
        }
        if let Some(value) = get("DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(value));
        }
        if let Some(value) = get("DRIVE_API_BASE") {
            self.drive_api_base = value;
        }
        if let Some(value) = get("DRIVE_UPLOAD_BASE") {
            self.drive_upload_base = value;
        }
        if let Some(value) = get("SECRETS_DIR") {
            self.secrets_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = get("STORAGE_PASSPHRASE") {
            self.storage_passphrase = Some(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if normalize_text_option(self.client_id.clone()).is_none() {
            return Err(ConfigError::Invalid(format!(
                "OAuth client id is required (set {ENV_PREFIX}CLIENT_ID)"
            )));
        }
        for (key, url) in [
            ("auth_url", &self.auth_url),
            ("token_url", &self.token_url),
            ("drive_api_base", &self.drive_api_base),
            ("drive_upload_base", &self.drive_upload_base),
        ] {
            if !is_http_url(url) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must include http:// or https://".to_string(),
                });
            }
        }
        if self.app_folder.trim().is_empty() {
            return Err(invalid("app_folder", "must not be empty"));
        }
        if self.drain_interval_secs == 0 {
            return Err(invalid("drain_interval_secs", "must be greater than zero"));
        }
        if self.retry_ceiling == 0 {
            return Err(invalid("retry_ceiling", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn oauth_config(&self) -> OAuthConfig {
        OAuthConfig {
            client_id: self.client_id.clone().unwrap_or_default(),
            client_secret: normalize_text_option(self.client_secret.clone()),
            auth_url: self.auth_url.clone(),
            token_url: self.token_url.clone(),
            scopes: GOOGLE_SCOPES.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
    }

    pub fn queue_config(&self) -> SyncQueueConfig {
        SyncQueueConfig {
            drain_interval: Duration::from_secs(self.drain_interval_secs),
            retry_ceiling: self.retry_ceiling,
            app_folder: self.app_folder.clone(),
        }
    }

    /// Passphrase for the encrypted file fallback.
    pub fn storage_passphrase(&self) -> &str {
        self.storage_passphrase
            .as_deref()
            .unwrap_or(DEFAULT_PASSPHRASE)
    }

    pub const fn resolver(&self) -> ConflictResolver {
        ConflictResolver::new(self.conflict_strategy)
    }
}

fn parse_value<T>(name: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|error: T::Err| ConfigError::InvalidValue {
        key: format!("{ENV_PREFIX}{name}"),
        message: error.to_string(),
    })
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
