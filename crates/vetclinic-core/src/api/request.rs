//! Transport-neutral request and response values.
//!
//! `ApiRequest` is what the pipeline hands to a [`Transport`](super::Transport);
//! `ApiResponse` is what comes back. Non-2xx statuses are ordinary responses
//! here, the pipeline and the typed client decide what they mean.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ApiError;

/// Which part of the API a request belongs to.
///
/// Refresh-and-retry eligibility is decided from this tag rather than from
/// the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Login,
    Refresh,
    Logout,
    Verify,
    Resource,
}

impl RequestKind {
    /// Whether a 401 on this request may trigger a token refresh.
    /// Login and refresh calls never do, otherwise a rejected refresh
    /// token would try to refresh itself.
    pub fn allows_refresh(self) -> bool {
        !matches!(self, RequestKind::Login | RequestKind::Refresh)
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the configured API base, e.g. `/pets/12/`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: HeaderMap,
    pub kind: RequestKind,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
            kind: RequestKind::Resource,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_kind(mut self, kind: RequestKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set `Authorization: Bearer <token>`, replacing any previous value.
    pub fn set_bearer(&mut self, token: &str) -> Result<(), ApiError> {
        let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            ApiError::InvalidResponse("Access token is not a valid header value".to_string())
        })?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// The bearer token this request carries, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// Turn a non-2xx response into the matching `ApiError`.
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.body))
        }
    }

    /// Decode the body as JSON. An empty body decodes as `null` so that
    /// `204 No Content` can be read into `()` or `Option<T>`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let text = if self.body.trim().is_empty() {
            "null"
        } else {
            self.body.as_str()
        };
        serde_json::from_str(text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_eligibility_by_kind() {
        assert!(!RequestKind::Login.allows_refresh());
        assert!(!RequestKind::Refresh.allows_refresh());
        assert!(RequestKind::Logout.allows_refresh());
        assert!(RequestKind::Verify.allows_refresh());
        assert!(RequestKind::Resource.allows_refresh());
    }

    #[test]
    fn test_bearer_roundtrip() {
        let mut request = ApiRequest::get("/pets/");
        assert_eq!(request.bearer_token(), None);

        request.set_bearer("abc.def").expect("valid header");
        assert_eq!(request.bearer_token(), Some("abc.def"));

        request.set_bearer("next").expect("valid header");
        assert_eq!(request.bearer_token(), Some("next"));
        assert_eq!(request.headers.get_all(AUTHORIZATION).iter().count(), 1);
    }

    #[test]
    fn test_bearer_rejects_control_characters() {
        let mut request = ApiRequest::get("/pets/");
        assert!(request.set_bearer("bad\ntoken").is_err());
    }

    #[test]
    fn test_response_json_and_status() {
        let ok = ApiResponse::new(StatusCode::OK, r#"{"id": 3}"#);
        let value: Value = ok.json().expect("json");
        assert_eq!(value["id"], 3);

        let empty = ApiResponse::new(StatusCode::NO_CONTENT, "");
        let nothing: Option<Value> = empty.json().expect("empty body");
        assert!(nothing.is_none());

        let denied = ApiResponse::new(StatusCode::UNAUTHORIZED, "");
        assert!(denied.is_unauthorized());
        assert!(matches!(denied.error_for_status(), Err(ApiError::Unauthorized)));
    }
}
