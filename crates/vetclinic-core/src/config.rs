//! Application configuration management.
//!
//! This module handles loading and saving the persisted configuration (API
//! base URL, request timeout, session backend and the last used username)
//! and resolving it against environment overrides into runtime `Settings`.
//!
//! Configuration is stored at `~/.config/vetclinic/config.json`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{FileStorage, KeyringStorage, SessionCipher, SessionStorage};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "vetclinic";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Base URL used when neither the environment nor the config file sets one
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

pub const ENV_API_URL: &str = "VETCLINIC_API_URL";
pub const ENV_TIMEOUT_SECS: &str = "VETCLINIC_TIMEOUT_SECS";
pub const ENV_SESSION_STORE: &str = "VETCLINIC_SESSION_STORE";
pub const ENV_SESSION_PASSPHRASE: &str = "VETCLINIC_SESSION_PASSPHRASE";
pub const ENV_SESSION_DIR: &str = "VETCLINIC_SESSION_DIR";

/// Where the session snapshot is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    File,
    Keyring,
}

impl FromStr for SessionBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(SessionBackend::File),
            "keyring" | "keychain" => Ok(SessionBackend::Keyring),
            other => Err(anyhow::anyhow!(
                "Unknown session store '{}' (expected 'file' or 'keyring')",
                other
            )),
        }
    }
}

impl fmt::Display for SessionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionBackend::File => f.write_str("file"),
            SessionBackend::Keyring => f.write_str("keyring"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub session_backend: Option<SessionBackend>,
    #[serde(default)]
    pub last_username: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> Result<Settings> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve with environment lookups supplied by `env`.
    /// Precedence: environment, then config file, then defaults.
    pub fn resolve_with<F>(&self, env: F) -> Result<Settings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let api_url = lookup(ENV_API_URL)
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = api_url.trim().trim_end_matches('/').to_string();
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            anyhow::bail!("Invalid API URL '{}': expected http:// or https://", api_url);
        }

        let timeout_secs = match lookup(ENV_TIMEOUT_SECS) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid {} '{}'", ENV_TIMEOUT_SECS, raw))?,
            None => self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        };
        if timeout_secs == 0 {
            anyhow::bail!("Request timeout must be at least one second");
        }

        let session_backend = match lookup(ENV_SESSION_STORE) {
            Some(raw) => raw.parse::<SessionBackend>()?,
            None => self.session_backend.unwrap_or_default(),
        };

        let session_dir = match lookup(ENV_SESSION_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => Self::cache_dir().unwrap_or_else(|_| PathBuf::from("./.vetclinic")),
        };

        Ok(Settings {
            api_url,
            timeout: Duration::from_secs(timeout_secs),
            session_backend,
            session_passphrase: lookup(ENV_SESSION_PASSPHRASE),
            session_dir,
        })
    }
}

/// Fully resolved runtime settings.
#[derive(Clone)]
pub struct Settings {
    pub api_url: String,
    pub timeout: Duration,
    pub session_backend: SessionBackend,
    pub session_passphrase: Option<String>,
    pub session_dir: PathBuf,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .field("session_backend", &self.session_backend)
            .field("session_passphrase", &self.session_passphrase.as_ref().map(|_| "<redacted>"))
            .field("session_dir", &self.session_dir)
            .finish()
    }
}

impl Settings {
    /// Build the storage backend these settings select.
    pub fn session_storage(&self) -> Result<Box<dyn SessionStorage>> {
        match self.session_backend {
            SessionBackend::Keyring => Ok(Box::new(KeyringStorage::new())),
            SessionBackend::File => {
                let mut storage = FileStorage::new(&self.session_dir);
                if let Some(ref passphrase) = self.session_passphrase {
                    storage = storage.with_cipher(SessionCipher::new(passphrase.as_str())?);
                }
                Ok(Box::new(storage))
            }
        }
    }
}
