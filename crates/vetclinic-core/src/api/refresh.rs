//! Token refresh with at most one refresh call in flight.
//!
//! `SingleFlight` memoizes an operation only while it runs: every caller
//! that arrives during the operation awaits the same shared future, and the
//! slot is emptied as the operation settles so the next expiry starts a new
//! one.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{ApiRequest, RequestKind, Transport, REFRESH_PATH};
use crate::auth::SessionStore;

// ============================================================================
// SingleFlight
// ============================================================================

struct Flight<T> {
    generation: u64,
    future: Shared<BoxFuture<'static, T>>,
}

pub struct SingleFlight<T> {
    slot: Mutex<Option<Flight<T>>>,
    generation: AtomicU64,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start()` unless an operation is already in flight, in which case
    /// wait for that one instead. Either way the caller gets the outcome of
    /// the operation that was running when it arrived.
    pub async fn run<F, Fut>(self: &Arc<Self>, start: F) -> T
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send + 'static,
    {
        let future = {
            let mut slot = self.lock();
            match *slot {
                Some(ref flight) => {
                    debug!(generation = flight.generation, "Joining in-flight operation");
                    flight.future.clone()
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                    let owner = Arc::downgrade(self);
                    let operation = start();
                    let future = async move {
                        let outcome = operation.await;
                        // Empty the slot before any waiter sees the outcome
                        if let Some(owner) = owner.upgrade() {
                            owner.settle(generation);
                        }
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(Flight {
                        generation,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        future.await
    }

    pub fn in_flight(&self) -> bool {
        self.lock().is_some()
    }

    /// Number of operations started so far.
    pub fn started(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    fn settle(&self, generation: u64) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|f| f.generation == generation) {
            *slot = None;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Flight<T>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// RefreshCoordinator
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh token rejected (status {0})")]
    Rejected(u16),

    #[error("Refresh request failed: {0}")]
    Unreachable(String),

    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("Session was cleared while refreshing")]
    SessionCleared,
}

pub type RefreshOutcome = Result<String, RefreshError>;

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "access_token")]
    access: String,
    #[serde(default, alias = "refresh_token")]
    refresh: Option<String>,
}

/// Shares one `POST /auth/refresh/` between every request that finds its
/// access token expired at the same time.
#[derive(Default)]
pub struct RefreshCoordinator {
    flight: Arc<SingleFlight<RefreshOutcome>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Obtain an access token to replace `rejected`, joining a refresh
    /// already in progress.
    ///
    /// If the store no longer holds `rejected` when the operation starts, a
    /// previous refresh already replaced it and that token is returned
    /// without calling the server. On success the store holds the new access
    /// token (and the rotated refresh token, if the server sent one). On
    /// failure the store has been cleared.
    pub async fn refresh(
        &self,
        transport: Arc<dyn Transport>,
        session: SessionStore,
        rejected: Option<String>,
    ) -> RefreshOutcome {
        self.flight
            .run(move || refresh_tokens(transport, session, rejected))
            .await
    }

    pub fn in_flight(&self) -> bool {
        self.flight.in_flight()
    }

    /// Number of refresh operations started so far.
    pub fn refresh_count(&self) -> u64 {
        self.flight.started()
    }
}

async fn refresh_tokens(
    transport: Arc<dyn Transport>,
    session: SessionStore,
    rejected: Option<String>,
) -> RefreshOutcome {
    let Some(refresh_token) = session.refresh_token() else {
        return Err(RefreshError::NoRefreshToken);
    };

    // Runs with the flight slot held by this operation, so a refresh that
    // settled just before is visible here as a changed token.
    if let Some(current) = session.access_token() {
        if rejected.as_deref() != Some(current.as_str()) {
            debug!("Access token already replaced, skipping refresh");
            return Ok(current);
        }
    }

    info!("Access token rejected, refreshing");
    match request_new_tokens(transport.as_ref(), &refresh_token).await {
        Ok(tokens) => {
            let Some(user) = session.user() else {
                debug!("Session cleared during refresh, discarding new tokens");
                return Err(RefreshError::SessionCleared);
            };
            let rotated = tokens.refresh.is_some();
            let refresh = tokens.refresh.or(Some(refresh_token));
            session.set_session(user, tokens.access.clone(), refresh);
            info!(rotated, "Access token refreshed");
            Ok(tokens.access)
        }
        Err(e) => {
            warn!(error = %e, "Token refresh failed, clearing session");
            session.clear_session();
            Err(e)
        }
    }
}

async fn request_new_tokens(
    transport: &dyn Transport,
    refresh_token: &str,
) -> Result<RefreshResponse, RefreshError> {
    let request = ApiRequest::post(REFRESH_PATH)
        .with_kind(RequestKind::Refresh)
        .with_body(json!({ "refresh": refresh_token }));

    let response = transport
        .send(request)
        .await
        .map_err(|e| RefreshError::Unreachable(e.to_string()))?;

    if !response.is_success() {
        return Err(RefreshError::Rejected(response.status.as_u16()));
    }

    let tokens: RefreshResponse = response
        .json()
        .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;
    if tokens.access.is_empty() {
        return Err(RefreshError::InvalidResponse("empty access token".to_string()));
    }
    Ok(tokens)
}
