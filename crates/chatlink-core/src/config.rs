//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the backend base URL, the durable storage backend for the
//! access token, and the last used username.
//!
//! Configuration is stored at `~/.config/chatlink/config.json`. The
//! `CHATLINK_API_BASE_URL` and `CHATLINK_STORAGE` environment variables take
//! precedence over the file and are never written back to it.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "chatlink";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the backend base URL
pub const ENV_API_BASE_URL: &str = "CHATLINK_API_BASE_URL";

/// Environment variable overriding the storage backend
pub const ENV_STORAGE: &str = "CHATLINK_STORAGE";

/// HTTP request timeout in seconds when none is configured.
/// 30s allows for slow model responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Where the access token is mirrored between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON file in the user cache directory
    #[default]
    File,
    /// OS keychain
    Keyring,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" | "keychain" => Ok(Self::Keyring),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Keyring => f.write_str("keyring"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub storage: StorageBackend,
    pub last_username: Option<String>,
    pub request_timeout_secs: Option<u64>,

    #[serde(skip)]
    env_api_base_url: Option<String>,
    #[serde(skip)]
    env_storage: Option<StorageBackend>,
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup (normally the process environment).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.env_api_base_url = lookup(ENV_API_BASE_URL).filter(|url| !url.trim().is_empty());
        self.env_storage = match lookup(ENV_STORAGE) {
            Some(value) if !value.trim().is_empty() => Some(
                value
                    .parse()
                    .with_context(|| format!("Invalid {} value", ENV_STORAGE))?,
            ),
            _ => None,
        };
        Ok(self)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Effective backend base URL, environment first.
    pub fn base_url(&self) -> Result<&str> {
        self.env_api_base_url
            .as_deref()
            .or(self.api_base_url.as_deref())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No backend URL configured. Set {} or api_base_url in {}",
                    ENV_API_BASE_URL,
                    CONFIG_FILE
                )
            })
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.env_storage.unwrap_or(self.storage)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }
}
