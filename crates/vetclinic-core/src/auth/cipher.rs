//! At-rest encryption for the session file.
//!
//! The key is derived from a passphrase with Argon2id and a random salt; the
//! snapshot is sealed with ChaCha20-Poly1305 under a fresh random nonce.
//!
//! Derivation is slow, so each `SessionCipher` derives once and
//! keeps the key for its salt. Later seals reuse that salt and key; opening
//! an envelope with a different salt derives again and replaces the cache.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, bail, Context, Result};
use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

const ENVELOPE_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u8,
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

/// Key derived for one salt.
#[derive(Clone)]
struct DerivedKey {
    salt: [u8; SALT_LEN],
    cipher: ChaCha20Poly1305,
}

/// Clones share the derived key.
#[derive(Clone)]
pub struct SessionCipher {
    passphrase: String,
    derived: Arc<Mutex<Option<DerivedKey>>>,
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}

impl SessionCipher {
    pub fn new(passphrase: impl Into<String>) -> Result<Self> {
        let passphrase = passphrase.into();
        if passphrase.is_empty() {
            bail!("Session passphrase must not be empty");
        }
        Ok(Self {
            passphrase,
            derived: Arc::new(Mutex::new(None)),
        })
    }

    fn derive(&self, salt: [u8; SALT_LEN]) -> Result<DerivedKey> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), &salt, &mut key)
            .map_err(|e| anyhow!("Failed to derive session key: {}", e))?;
        Ok(DerivedKey {
            salt,
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        })
    }

    /// Cached key, or a new one for a fresh random salt.
    fn current_key(&self) -> Result<DerivedKey> {
        let mut derived = self.derived.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ref key) = *derived {
            return Ok(key.clone());
        }
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = self.derive(salt)?;
        *derived = Some(key.clone());
        Ok(key)
    }

    /// Key for `salt`, derived only when it differs from the cached one.
    fn key_for(&self, salt: [u8; SALT_LEN]) -> Result<DerivedKey> {
        let mut derived = self.derived.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ref key) = *derived {
            if key.salt == salt {
                return Ok(key.clone());
            }
        }
        let key = self.derive(salt)?;
        *derived = Some(key.clone());
        Ok(key)
    }

    /// Encrypt `plaintext` into a self-describing JSON envelope.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let key = self.current_key()?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = key
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| anyhow!("Failed to encrypt session"))?;

        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            salt: key.salt.to_vec(),
            nonce: nonce.to_vec(),
            ciphertext,
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Decrypt an envelope produced by [`seal`](Self::seal).
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>> {
        let envelope: Envelope =
            serde_json::from_str(sealed).context("Session file is not an encrypted envelope")?;

        if envelope.version != ENVELOPE_VERSION {
            bail!("Unsupported session envelope version {}", envelope.version);
        }
        let salt: [u8; SALT_LEN] = match envelope.salt.as_slice().try_into() {
            Ok(salt) if envelope.nonce.len() == NONCE_LEN => salt,
            _ => bail!("Malformed session envelope"),
        };

        self.key_for(salt)?
            .cipher
            .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
            .map_err(|_| anyhow!("Failed to decrypt session (wrong passphrase or corrupted file)"))
    }
}
