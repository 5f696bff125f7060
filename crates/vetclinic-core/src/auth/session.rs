use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::storage::{MemoryStorage, SessionStorage};
use crate::models::User;

/// The session as held in memory and as persisted by a `SessionStorage`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    fn authenticated(user: User, access_token: String, refresh_token: Option<String>) -> Self {
        Self {
            user: Some(user),
            access_token: Some(access_token),
            refresh_token,
            is_authenticated: true,
            saved_at: Some(Utc::now()),
        }
    }

    /// Re-derive `is_authenticated` from the fields. A snapshot holding only
    /// part of a session is discarded as a whole.
    fn normalized(self) -> Self {
        let complete = self.user.is_some()
            && self.access_token.as_deref().is_some_and(|t| !t.is_empty());
        if complete {
            Self {
                is_authenticated: true,
                ..self
            }
        } else {
            Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Persisted state has not been loaded yet
    Unknown,
    Anonymous,
    Authenticated,
}

struct Inner {
    state: RwLock<SessionSnapshot>,
    storage: Box<dyn SessionStorage>,
    hydrated: watch::Sender<bool>,
}

/// Single owner of the current identity and token pair.
///
/// Clone is cheap and every clone sees the same session. All mutation goes
/// through [`set_session`](Self::set_session) and
/// [`clear_session`](Self::clear_session), which replace the whole state
/// under one write lock and persist it before releasing the lock.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    /// Create a store that has not been hydrated yet.
    pub fn new(storage: impl SessionStorage + 'static) -> Self {
        Self::from_boxed(Box::new(storage))
    }

    pub fn from_boxed(storage: Box<dyn SessionStorage>) -> Self {
        let (hydrated, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(SessionSnapshot::default()),
                storage,
                hydrated,
            }),
        }
    }

    /// Create a store and immediately rehydrate it from storage.
    pub fn open(storage: impl SessionStorage + 'static) -> Self {
        let store = Self::new(storage);
        store.hydrate();
        store
    }

    /// Ephemeral, already-hydrated store with nothing persisted.
    pub fn in_memory() -> Self {
        Self::open(MemoryStorage::default())
    }

    /// Load the persisted snapshot. Runs once; later calls are no-ops, as is
    /// hydrating after the session was already set or cleared explicitly.
    pub fn hydrate(&self) {
        if self.is_hydrated() {
            return;
        }

        let loaded = match self.inner.storage.load() {
            Ok(Some(snapshot)) => snapshot.normalized(),
            Ok(None) => SessionSnapshot::default(),
            Err(e) => {
                warn!(error = %e, location = %self.inner.storage.location(), "Failed to load session, starting logged out");
                SessionSnapshot::default()
            }
        };

        {
            let mut state = self.write_state();
            // An explicit set/clear may have raced ahead of us
            if self.is_hydrated() {
                return;
            }
            *state = loaded;
            info!(
                authenticated = state.is_authenticated,
                has_refresh_token = state.refresh_token.is_some(),
                "Session rehydrated"
            );
            self.inner.hydrated.send_replace(true);
        }
    }

    pub fn is_hydrated(&self) -> bool {
        *self.inner.hydrated.borrow()
    }

    /// Wait until the persisted session has been loaded.
    pub async fn wait_hydrated(&self) {
        let mut rx = self.inner.hydrated.subscribe();
        // The sender lives as long as `self`, so this only returns on hydration
        let _ = rx.wait_for(|hydrated| *hydrated).await;
    }

    /// Replace user and both tokens at once and persist the result.
    ///
    /// Persistence failures are logged; the in-memory session is updated
    /// regardless.
    pub fn set_session(&self, user: User, access_token: impl Into<String>, refresh_token: Option<String>) {
        let snapshot = SessionSnapshot::authenticated(user, access_token.into(), refresh_token);
        {
            let mut state = self.write_state();
            if let Err(e) = self.inner.storage.save(&snapshot) {
                warn!(error = %e, location = %self.inner.storage.location(), "Failed to save session");
            }
            debug!(user = ?snapshot.user.as_ref().map(|u| &u.username), "Session set");
            *state = snapshot;
            self.inner.hydrated.send_replace(true);
        }
    }

    /// Drop the session entirely. Safe to call when already logged out.
    pub fn clear_session(&self) {
        {
            let mut state = self.write_state();
            if let Err(e) = self.inner.storage.clear() {
                warn!(error = %e, location = %self.inner.storage.location(), "Failed to clear persisted session");
            }
            if state.is_authenticated || state.refresh_token.is_some() {
                info!("Session cleared");
            }
            *state = SessionSnapshot::default();
            self.inner.hydrated.send_replace(true);
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read_state().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.read_state().user.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read_state().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read_state().refresh_token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_state().is_authenticated
    }

    pub fn auth_status(&self) -> AuthStatus {
        if !self.is_hydrated() {
            AuthStatus::Unknown
        } else if self.is_authenticated() {
            AuthStatus::Authenticated
        } else {
            AuthStatus::Anonymous
        }
    }

    /// Where the session is persisted, for diagnostics.
    pub fn storage_location(&self) -> String {
        self.inner.storage.location()
    }

    // The state is only ever replaced wholesale, so a poisoned lock still
    // holds a consistent snapshot.
    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, SessionSnapshot> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, SessionSnapshot> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
