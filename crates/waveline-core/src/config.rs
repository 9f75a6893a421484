//! Application configuration management.
//!
//! This module handles loading the application configuration,
//! which holds the OAuth client ID, the redirect URI registered for it, and
//! which backend persists the session.
//!
//! Configuration is stored at `~/.config/waveline/config.json`. The
//! `WAVELINE_CLIENT_ID` and `WAVELINE_REDIRECT_URI` environment variables
//! take precedence over the file.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{AuthError, FileStore, KeyringStore, SessionStore};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "waveline";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const CLIENT_ID_ENV: &str = "WAVELINE_CLIENT_ID";
pub const REDIRECT_URI_ENV: &str = "WAVELINE_REDIRECT_URI";

/// Loopback address the authorization server sends the browser back to
/// when nothing else is configured.
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";

/// Where the session token, its expiry and the cached profile are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON file in the cache directory
    #[default]
    File,
    /// OS keychain
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub storage: StorageBackend,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay values from the environment (or any lookup) onto the file
    /// config. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(id) = non_empty(CLIENT_ID_ENV) {
            debug!("Client ID taken from environment");
            self.client_id = Some(id);
        }
        if let Some(uri) = non_empty(REDIRECT_URI_ENV) {
            self.redirect_uri = Some(uri);
        }
    }

    /// The OAuth client ID. There is no built-in fallback: a missing ID is a
    /// configuration error the user has to see.
    pub fn client_id(&self) -> Result<&str, AuthError> {
        self.client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(AuthError::MissingClientId)
    }

    pub fn redirect_uri(&self) -> &str {
        self.redirect_uri
            .as_deref()
            .filter(|uri| !uri.trim().is_empty())
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Open the durable store selected by `storage`.
    pub fn session_store(&self) -> Result<Box<dyn SessionStore>> {
        match self.storage {
            StorageBackend::File => {
                let dir = self.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
                Ok(Box::new(FileStore::new(dir)))
            }
            StorageBackend::Keyring => Ok(Box::new(KeyringStore::new(APP_NAME))),
        }
    }
}
