//! Scripted in-process API used by the pipeline and client tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use super::{ApiError, ApiRequest, ApiResponse, Transport, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH, VERIFY_PATH};
use crate::models::{Role, User};

pub const USERNAME: &str = "drlopez";
pub const PASSWORD: &str = "s3cret";

pub fn sample_user() -> User {
    User {
        id: 11,
        username: USERNAME.to_string(),
        email: Some("ana@clinic.test".to_string()),
        first_name: Some("Ana".to_string()),
        last_name: Some("Lopez".to_string()),
        roles: vec![Role::Veterinarian],
    }
}

#[derive(Debug, Clone)]
pub enum RefreshBehavior {
    /// Accept the refresh and start honoring `access`
    Issue {
        access: String,
        refresh: Option<String>,
    },
    /// Answer 401, as for an expired or revoked refresh token
    Reject,
    /// Never answer
    Timeout,
}

struct State {
    valid_access: Option<String>,
    refresh: RefreshBehavior,
    refresh_delay: Duration,
    reject_all: bool,
    canned: HashMap<String, (StatusCode, String)>,
}

pub struct FakeServer {
    state: Mutex<State>,
    log: Mutex<Vec<ApiRequest>>,
}

impl FakeServer {
    /// A server that accepts `valid_access` as bearer token and, by default,
    /// refreshes to `"access-2"` after a short delay.
    pub fn new(valid_access: &str) -> Self {
        Self {
            state: Mutex::new(State {
                valid_access: Some(valid_access.to_string()),
                refresh: RefreshBehavior::Issue {
                    access: "access-2".to_string(),
                    refresh: None,
                },
                refresh_delay: Duration::from_millis(25),
                reject_all: false,
                canned: HashMap::new(),
            }),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn set_refresh(&self, behavior: RefreshBehavior) {
        self.state.lock().unwrap().refresh = behavior;
    }

    pub fn set_valid_access(&self, token: Option<&str>) {
        self.state.lock().unwrap().valid_access = token.map(str::to_string);
    }

    /// Answer 401 to every protected request, whatever the token.
    pub fn reject_all(&self, reject: bool) {
        self.state.lock().unwrap().reject_all = reject;
    }

    /// Fixed answer for an authorized request to `path`.
    pub fn set_response(&self, path: &str, status: StatusCode, body: &str) {
        self.state
            .lock()
            .unwrap()
            .canned
            .insert(path.to_string(), (status, body.to_string()));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests().into_iter().filter(|r| r.path == path).collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }

    fn unauthorized() -> ApiResponse {
        ApiResponse::new(
            StatusCode::UNAUTHORIZED,
            r#"{"detail": "Given token not valid for any token type"}"#,
        )
    }

    fn login(&self, request: &ApiRequest) -> ApiResponse {
        let body = request.body.clone().unwrap_or_default();
        if body["username"] != USERNAME || body["password"] != PASSWORD {
            return ApiResponse::new(
                StatusCode::UNAUTHORIZED,
                r#"{"detail": "No active account found with the given credentials"}"#,
            );
        }
        let access = self.state.lock().unwrap().valid_access.clone();
        ApiResponse::new(
            StatusCode::OK,
            json!({ "access": access, "refresh": "refresh-1", "user": sample_user() }).to_string(),
        )
    }

    fn logout(&self) -> ApiResponse {
        match self.state.lock().unwrap().canned.get(LOGOUT_PATH) {
            Some((status, body)) => ApiResponse::new(*status, body.clone()),
            None => ApiResponse::new(StatusCode::RESET_CONTENT, ""),
        }
    }

    async fn refresh(&self) -> Result<ApiResponse, ApiError> {
        let (behavior, delay) = {
            let state = self.state.lock().unwrap();
            (state.refresh.clone(), state.refresh_delay)
        };
        tokio::time::sleep(delay).await;

        match behavior {
            RefreshBehavior::Issue { access, refresh } => {
                self.state.lock().unwrap().valid_access = Some(access.clone());
                let mut body = json!({ "access": access });
                if let Some(refresh) = refresh {
                    body["refresh"] = json!(refresh);
                }
                Ok(ApiResponse::new(StatusCode::OK, body.to_string()))
            }
            RefreshBehavior::Reject => Ok(ApiResponse::new(
                StatusCode::UNAUTHORIZED,
                r#"{"detail": "Token is invalid or expired", "code": "token_not_valid"}"#,
            )),
            RefreshBehavior::Timeout => Err(ApiError::Timeout),
        }
    }

    fn protected(&self, request: &ApiRequest) -> ApiResponse {
        let state = self.state.lock().unwrap();
        let authorized = !state.reject_all
            && request.bearer_token().is_some()
            && request.bearer_token() == state.valid_access.as_deref();
        if !authorized {
            return Self::unauthorized();
        }

        if let Some((status, body)) = state.canned.get(&request.path) {
            return ApiResponse::new(*status, body.clone());
        }
        if request.path == VERIFY_PATH {
            return ApiResponse::new(
                StatusCode::OK,
                json!({ "user": sample_user() }).to_string(),
            );
        }
        ApiResponse::new(
            StatusCode::OK,
            json!({ "path": request.path, "token": request.bearer_token() }).to_string(),
        )
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.log.lock().unwrap().push(request.clone());

        match request.path.as_str() {
            LOGIN_PATH => Ok(self.login(&request)),
            REFRESH_PATH => self.refresh().await,
            LOGOUT_PATH => Ok(self.logout()),
            "/timeout/" => Err(ApiError::Timeout),
            "/boom/" => Ok(ApiResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"detail": "boom"}"#,
            )),
            _ => Ok(self.protected(&request)),
        }
    }
}
