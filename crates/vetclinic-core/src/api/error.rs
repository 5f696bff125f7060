use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized - session expired or credentials rejected")]
    Unauthorized,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Request rejected ({status}): {body}")]
    BadRequest { status: u16, body: String },

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            code @ 400..=499 => ApiError::BadRequest {
                status: code,
                body: truncated,
            },
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Map a reqwest failure that produced no response.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::NetworkError(err)
        }
    }

    /// True when the caller should be sent back to the login entry point.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// True when no response was received at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout | ApiError::NetworkError(_) | ApiError::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, ""),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, "nope"),
            ApiError::AccessDenied(ref b) if b == "nope"
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::NOT_FOUND, "missing"),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_REQUEST, r#"{"name":["required"]}"#),
            ApiError::BadRequest { status: 400, ref body } if body.contains("required")
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream"),
            ApiError::ServerError(_)
        ));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.contains("520 total bytes"));

        // Multi-byte characters straddling the limit must not panic
        let accented = "é".repeat(MAX_ERROR_BODY_LENGTH);
        let truncated = ApiError::truncate_body(&accented);
        assert!(truncated.contains("truncated"));
    }

    #[test]
    fn test_classification() {
        assert!(ApiError::Unauthorized.is_auth_failure());
        assert!(!ApiError::RateLimited.is_auth_failure());
        assert!(ApiError::Timeout.is_connectivity());
        assert!(ApiError::Transport("reset".into()).is_connectivity());
        assert!(!ApiError::NotFound(String::new()).is_connectivity());
    }
}
