//! Durable homes for the session snapshot.
//!
//! Every backend stores a single entry keyed by [`SESSION_NAMESPACE`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use keyring::Entry;

use super::cipher::SessionCipher;
use super::session::SessionSnapshot;

/// Fixed key under which the session snapshot is persisted
pub const SESSION_NAMESPACE: &str = "vetclinic-session";

/// Keychain service name
const KEYRING_SERVICE: &str = "vetclinic";

pub trait SessionStorage: Send + Sync {
    /// Read the persisted snapshot, `None` when nothing was saved.
    fn load(&self) -> Result<Option<SessionSnapshot>>;

    fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;

    /// Remove the persisted snapshot. Removing nothing is not an error.
    fn clear(&self) -> Result<()>;

    /// Human-readable location, used in logs and `vetclinic status`.
    fn location(&self) -> String;
}

// ============================================================================
// File
// ============================================================================

/// JSON file in the cache directory, optionally encrypted at rest.
pub struct FileStorage {
    path: PathBuf,
    cipher: Option<SessionCipher>,
}

impl FileStorage {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("{}.json", SESSION_NAMESPACE)),
            cipher: None,
        }
    }

    pub fn with_cipher(mut self, cipher: SessionCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileStorage {
    fn load(&self) -> Result<Option<SessionSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session file: {}", self.path.display()))?;

        let json = match self.cipher {
            Some(ref cipher) => {
                let plain = cipher.open(&contents)?;
                String::from_utf8(plain).context("Decrypted session is not UTF-8")?
            }
            None => contents,
        };

        let snapshot = serde_json::from_str(&json).context("Failed to parse session file")?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(snapshot)?;
        let contents = match self.cipher {
            Some(ref cipher) => cipher.seal(json.as_bytes())?,
            None => json,
        };

        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write session file: {}", self.path.display()))?;

        // Tokens are credentials; keep the file private to the user
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).with_context(|| {
                format!("Failed to remove session file: {}", self.path.display())
            })?;
        }
        Ok(())
    }

    fn location(&self) -> String {
        let suffix = if self.cipher.is_some() { " (encrypted)" } else { "" };
        format!("file:{}{}", self.path.display(), suffix)
    }
}

// ============================================================================
// Keyring
// ============================================================================

/// OS keychain entry holding the snapshot JSON.
#[derive(Default)]
pub struct KeyringStorage;

impl KeyringStorage {
    pub fn new() -> Self {
        Self
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(KEYRING_SERVICE, SESSION_NAMESPACE).context("Failed to create keyring entry")
    }
}

impl SessionStorage for KeyringStorage {
    fn load(&self) -> Result<Option<SessionSnapshot>> {
        let json = match self.entry()?.get_password() {
            Ok(json) => json,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(e).context("Failed to read session from keychain"),
        };
        let snapshot = serde_json::from_str(&json).context("Failed to parse keychain session")?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.entry()?
            .set_password(&json)
            .context("Failed to store session in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }

    fn location(&self) -> String {
        format!("keyring:{}/{}", KEYRING_SERVICE, SESSION_NAMESPACE)
    }
}

// ============================================================================
// Memory
// ============================================================================

/// In-process slot holding the serialized snapshot. Clones share the slot,
/// so a second `SessionStore` over a clone behaves like a restarted process.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryStorage {
    /// The raw persisted JSON, if any.
    pub fn raw(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Overwrite the persisted JSON directly.
    pub fn put_raw(&self, json: &str) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(json.to_string());
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self) -> Result<Option<SessionSnapshot>> {
        match self.raw() {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("Failed to parse stored session")?,
            )),
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(json);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
