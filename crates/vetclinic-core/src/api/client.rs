//! API client for the clinic REST API.
//!
//! This module provides the `ApiClient` struct: JSON request helpers on top
//! of the authenticated pipeline, and the login / verify / logout flows that
//! populate and clear the session store.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    ApiError, ApiRequest, ApiResponse, AuthPipeline, HttpTransport, RequestKind, Resource,
    ResourceClient, Transport, LOGIN_PATH, LOGOUT_PATH, VERIFY_PATH,
};
use crate::auth::SessionStore;
use crate::config::Settings;
use crate::models::User;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(alias = "access_token")]
    access: String,
    #[serde(default, alias = "refresh_token")]
    refresh: Option<String>,
    user: User,
}

/// `/auth/verify/` answers either `{"user": {...}}` or the user itself.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VerifyResponse {
    Wrapped { user: User },
    Bare(User),
}

impl VerifyResponse {
    fn into_user(self) -> User {
        match self {
            VerifyResponse::Wrapped { user } | VerifyResponse::Bare(user) => user,
        }
    }
}

/// API client for the clinic backend.
/// Clone is cheap - clones share the pipeline, session and connection pool.
#[derive(Clone)]
pub struct ApiClient {
    pipeline: Arc<AuthPipeline>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, session: SessionStore) -> Self {
        Self {
            pipeline: Arc::new(AuthPipeline::new(transport, session)),
        }
    }

    /// Build the HTTP transport and the persisted session store described by
    /// `settings`, rehydrating the session before returning.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let session = SessionStore::from_boxed(settings.session_storage()?);
        session.hydrate();

        let transport = HttpTransport::new(&settings.api_url, settings.timeout)
            .context("Failed to build HTTP client")?;

        debug!(
            api_url = %settings.api_url,
            storage = %session.storage_location(),
            "API client configured"
        );
        Ok(Self::new(Arc::new(transport), session))
    }

    pub fn session(&self) -> &SessionStore {
        self.pipeline.session()
    }

    pub fn pipeline(&self) -> &AuthPipeline {
        &self.pipeline
    }

    // ===== Request helpers =====

    /// Send a request through the pipeline and fail on non-2xx statuses.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let label = format!("{} {}", request.method, request.path);
        let response = self
            .pipeline
            .send(request)
            .await
            .with_context(|| format!("Failed to send {} request", label))?;
        Ok(response.error_for_status()?)
    }

    async fn execute_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let label = format!("{} {}", request.method, request.path);
        let response = self.execute(request).await?;
        response
            .json()
            .with_context(|| format!("Failed to parse JSON response from {}", label))
    }

    fn to_body<B: Serialize + ?Sized>(body: &B) -> Result<Value> {
        serde_json::to_value(body).context("Failed to serialize request body")
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute_json(ApiRequest::get(path)).await
    }

    pub async fn get_query<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        self.execute_json(ApiRequest::get(path).with_query(query.iter().copied()))
            .await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.execute_json(ApiRequest::post(path).with_body(Self::to_body(body)?))
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.execute_json(ApiRequest::put(path).with_body(Self::to_body(body)?))
            .await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.execute_json(ApiRequest::patch(path).with_body(Self::to_body(body)?))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.execute(ApiRequest::delete(path)).await?;
        Ok(())
    }

    // ===== Authentication =====

    /// Exchange credentials for a token pair and populate the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<User> {
        let request = ApiRequest::post(LOGIN_PATH)
            .with_kind(RequestKind::Login)
            .with_body(json!({ "username": username, "password": password }));

        let auth: LoginResponse = self.execute_json(request).await?;
        if auth.access.is_empty() {
            return Err(ApiError::InvalidResponse("Login returned an empty access token".to_string()).into());
        }
        self.session()
            .set_session(auth.user.clone(), auth.access, auth.refresh);

        info!(username = %auth.user.username, "Login successful");
        Ok(auth.user)
    }

    /// Validate the current access token and refresh the stored identity.
    ///
    /// A 401 that survives refresh-and-retry clears the session.
    pub async fn verify(&self) -> Result<User> {
        let request = ApiRequest::get(VERIFY_PATH).with_kind(RequestKind::Verify);

        let response: VerifyResponse = match self.execute_json(request).await {
            Ok(response) => response,
            Err(e) => {
                if e.downcast_ref::<ApiError>().is_some_and(ApiError::is_auth_failure) {
                    warn!("Session verification rejected, clearing session");
                    self.session().clear_session();
                }
                return Err(e);
            }
        };

        let user = response.into_user();
        let snapshot = self.session().snapshot();
        let Some(access) = snapshot.access_token else {
            // Logged out while the verification was in flight
            return Err(ApiError::Unauthorized.into());
        };
        self.session()
            .set_session(user.clone(), access, snapshot.refresh_token);

        debug!(username = %user.username, "Session verified");
        Ok(user)
    }

    /// Invalidate the refresh token server-side and clear the session.
    ///
    /// The local session is cleared even when the server call fails.
    pub async fn logout(&self) -> Result<()> {
        if let Some(refresh) = self.session().refresh_token() {
            let request = ApiRequest::post(LOGOUT_PATH)
                .with_kind(RequestKind::Logout)
                .with_body(json!({ "refresh": refresh }));
            if let Err(e) = self.execute(request).await {
                warn!(error = %e, "Server-side logout failed");
            }
        }

        self.session().clear_session();
        info!("Logged out");
        Ok(())
    }

    // ===== Resources =====

    pub fn resource(&self, resource: Resource) -> ResourceClient<'_> {
        ResourceClient::new(self, resource)
    }

    pub fn users(&self) -> ResourceClient<'_> {
        self.resource(Resource::Users)
    }

    pub fn pets(&self) -> ResourceClient<'_> {
        self.resource(Resource::Pets)
    }

    pub fn appointments(&self) -> ResourceClient<'_> {
        self.resource(Resource::Appointments)
    }

    pub fn consultations(&self) -> ResourceClient<'_> {
        self.resource(Resource::Consultations)
    }

    pub fn clinical_histories(&self) -> ResourceClient<'_> {
        self.resource(Resource::ClinicalHistories)
    }

    pub fn inventory(&self) -> ResourceClient<'_> {
        self.resource(Resource::Inventory)
    }

    pub fn billing(&self) -> ResourceClient<'_> {
        self.resource(Resource::Billing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{sample_user, FakeServer, RefreshBehavior, PASSWORD, USERNAME};
    use crate::api::REFRESH_PATH;
    use reqwest::StatusCode;

    fn client(server: &Arc<FakeServer>) -> ApiClient {
        ApiClient::new(server.clone(), SessionStore::in_memory())
    }

    #[test]
    fn test_parse_verify_response_shapes() {
        let wrapped: VerifyResponse =
            serde_json::from_str(r#"{"user": {"id": 1, "username": "a", "role": "admin"}}"#)
                .expect("wrapped");
        assert_eq!(wrapped.into_user().username, "a");

        let bare: VerifyResponse =
            serde_json::from_str(r#"{"id": 2, "username": "b", "roles": ["receptionist"]}"#)
                .expect("bare");
        assert_eq!(bare.into_user().id, 2);
    }

    #[tokio::test]
    async fn test_login_populates_session_and_authenticates_requests() {
        let server = Arc::new(FakeServer::new("access-1"));
        let client = client(&server);

        let user = client.login(USERNAME, PASSWORD).await.expect("login");
        assert_eq!(user, sample_user());

        let session = client.session();
        assert!(session.is_authenticated());
        assert_eq!(session.access_token().as_deref(), Some("access-1"));
        assert_eq!(session.refresh_token().as_deref(), Some("refresh-1"));

        let echoed: Value = client.get("/pets/").await.expect("get");
        assert_eq!(echoed["token"], "access-1");
        assert_eq!(server.requests_to("/pets/")[0].bearer_token(), Some("access-1"));
    }

    #[tokio::test]
    async fn test_login_with_bad_credentials() {
        let server = Arc::new(FakeServer::new("access-1"));
        let client = client(&server);

        let err = client.login(USERNAME, "wrong").await.expect_err("rejected");
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)));
        assert!(!client.session().is_authenticated());
        assert_eq!(server.count(REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn test_login_rejects_empty_access_token() {
        let server = Arc::new(FakeServer::new(""));
        let client = client(&server);

        let err = client.login(USERNAME, PASSWORD).await.expect_err("empty token");
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::InvalidResponse(_))));
        assert!(!client.session().is_authenticated());
        assert!(client.session().access_token().is_none());
    }

    #[tokio::test]
    async fn test_expired_access_token_is_transparent_to_caller() {
        let server = Arc::new(FakeServer::new("access-1"));
        let client = client(&server);
        client.login(USERNAME, PASSWORD).await.expect("login");

        // Server-side expiry: only a refreshed token is accepted now
        server.set_valid_access(Some("nothing-yet"));
        server.set_refresh(RefreshBehavior::Issue {
            access: "access-2".to_string(),
            refresh: Some("refresh-2".to_string()),
        });

        let echoed: Value = client.get("/appointments/").await.expect("recovered");
        assert_eq!(echoed["token"], "access-2");
        assert_eq!(server.count(REFRESH_PATH), 1);
        assert_eq!(client.session().refresh_token().as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn test_rejected_refresh_surfaces_unauthorized() {
        let server = Arc::new(FakeServer::new("access-1"));
        let client = client(&server);
        client.login(USERNAME, PASSWORD).await.expect("login");

        server.set_valid_access(Some("nothing-yet"));
        server.set_refresh(RefreshBehavior::Reject);

        let err = client.get::<Value>("/pets/").await.expect_err("401");
        assert!(err
            .downcast_ref::<ApiError>()
            .is_some_and(ApiError::is_auth_failure));
        assert!(!client.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_verify_repopulates_identity() {
        let server = Arc::new(FakeServer::new("access-1"));
        let client = client(&server);
        client
            .session()
            .set_session(User { roles: vec![], ..sample_user() }, "access-1", Some("refresh-1".to_string()));

        let user = client.verify().await.expect("verify");
        assert_eq!(user, sample_user());
        assert_eq!(client.session().user(), Some(sample_user()));
        assert_eq!(client.session().access_token().as_deref(), Some("access-1"));
        assert_eq!(client.session().refresh_token().as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_verify_without_refresh_token_clears_session() {
        let server = Arc::new(FakeServer::new("access-1"));
        let client = client(&server);
        client.session().set_session(sample_user(), "revoked", None);

        let err = client.verify().await.expect_err("rejected");
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)));
        assert!(!client.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_invalidates_refresh_token_and_clears() {
        let server = Arc::new(FakeServer::new("access-1"));
        let client = client(&server);
        client.login(USERNAME, PASSWORD).await.expect("login");

        client.logout().await.expect("logout");

        let sent = server.requests_to(LOGOUT_PATH);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, Some(json!({ "refresh": "refresh-1" })));
        assert_eq!(sent[0].kind, RequestKind::Logout);
        assert!(!client.session().is_authenticated());
        assert!(client.session().refresh_token().is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_server_unreachable() {
        let server = Arc::new(FakeServer::new("access-1"));
        let client = client(&server);
        client.login(USERNAME, PASSWORD).await.expect("login");
        server.set_response(LOGOUT_PATH, StatusCode::BAD_GATEWAY, "");

        client.logout().await.expect("logout never fails");
        assert!(!client.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_domain_errors_pass_through() {
        let server = Arc::new(FakeServer::new("access-1"));
        let client = client(&server);
        client.login(USERNAME, PASSWORD).await.expect("login");
        server.set_response(
            "/pets/",
            StatusCode::BAD_REQUEST,
            r#"{"species": ["This field is required."]}"#,
        );

        let err = client
            .post::<Value, _>("/pets/", &json!({ "name": "Toby" }))
            .await
            .expect_err("validation error");
        match err.downcast_ref::<ApiError>() {
            Some(ApiError::BadRequest { status, body }) => {
                assert_eq!(*status, 400);
                assert!(body.contains("species"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(server.count(REFRESH_PATH), 0);
    }
}
