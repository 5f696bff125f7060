//! Credential attachment and transparent recovery from access-token expiry.
//!
//! A request goes through [`attach_credentials`] and is dispatched. If the
//! answer is a 401 and the request is eligible, the pipeline obtains a new
//! access token through the [`RefreshCoordinator`] (sharing the refresh with
//! every other request that hit the same expiry) and dispatches the request
//! one more time. Whatever that second dispatch returns is final.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::refresh::RefreshCoordinator;
use super::{ApiError, ApiRequest, ApiResponse, Transport};
use crate::auth::SessionStore;

/// Set the bearer header from the store's current access token, if any.
pub fn attach_credentials(mut request: ApiRequest, session: &SessionStore) -> Result<ApiRequest, ApiError> {
    if let Some(token) = session.access_token() {
        request.set_bearer(&token)?;
    }
    Ok(request)
}

pub struct AuthPipeline {
    transport: Arc<dyn Transport>,
    session: SessionStore,
    refresher: RefreshCoordinator,
}

impl AuthPipeline {
    pub fn new(transport: Arc<dyn Transport>, session: SessionStore) -> Self {
        Self {
            transport,
            session,
            refresher: RefreshCoordinator::new(),
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    /// Dispatch `request` with credentials, recovering once from a 401.
    ///
    /// Non-2xx answers are returned as responses. When recovery is not
    /// possible the session is cleared and the caller receives the 401.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        // "No token" means nothing until the persisted session is loaded
        self.session.wait_hydrated().await;

        let kind = request.kind;
        let retry = request.clone();
        let request = attach_credentials(request, &self.session)?;
        let sent_with = request.bearer_token().map(str::to_string);

        let response = self.transport.send(request).await?;
        if !response.is_unauthorized() || !kind.allows_refresh() {
            return Ok(response);
        }

        debug!(path = %retry.path, ?kind, "Request unauthorized, attempting recovery");
        let Some(token) = self.recover(sent_with.as_deref()).await else {
            self.expire(sent_with.as_deref());
            return Ok(response);
        };

        let mut retry = retry;
        retry.set_bearer(&token)?;
        debug!(path = %retry.path, "Retrying request with new access token");
        let response = self.transport.send(retry).await?;
        if response.is_unauthorized() {
            warn!("Retried request still unauthorized");
            self.expire(Some(&token));
        }
        Ok(response)
    }

    /// Produce an access token worth retrying with, or `None` when the 401
    /// must be surfaced.
    async fn recover(&self, sent_with: Option<&str>) -> Option<String> {
        if self.session.refresh_token().is_none() {
            // A login may have replaced the rejected token meanwhile
            return match self.session.access_token() {
                Some(current) if sent_with != Some(current.as_str()) => Some(current),
                _ => {
                    debug!("No refresh token, surfacing 401");
                    None
                }
            };
        }

        match self
            .refresher
            .refresh(
                Arc::clone(&self.transport),
                self.session.clone(),
                sent_with.map(str::to_string),
            )
            .await
        {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "Could not refresh access token");
                None
            }
        }
    }

    /// Clear the session after an unrecoverable 401, unless it already
    /// moved on from the `rejected` token.
    fn expire(&self, rejected: Option<&str>) {
        if self.session.access_token().as_deref() == rejected {
            if self.session.is_authenticated() {
                info!("Session expired, clearing");
            }
            self.session.clear_session();
        }
    }
}
