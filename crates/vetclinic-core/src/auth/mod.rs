//! Authentication state for the clinic client.
//!
//! This module provides:
//! - `SessionStore`: the single owner of the logged-in user and token pair
//! - `SessionStorage` backends: JSON file, OS keychain, in-memory
//! - `SessionCipher`: optional passphrase encryption for the file backend
//!
//! The store is rehydrated from storage on startup and persisted on every
//! change.

pub mod cipher;
pub mod session;
pub mod storage;

pub use cipher::SessionCipher;
pub use session::{AuthStatus, SessionSnapshot, SessionStore};
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, SessionStorage, SESSION_NAMESPACE};
