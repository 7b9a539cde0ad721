//! HTTP error responses.
//!
//! Every failure leaves the server as `{"error": {"message", "type", "code"}}`.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use scenecast_session::SessionError;
use serde_json::json;

use crate::access::{AccessError, CorsGrant};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Access(AccessError::Authentication) => StatusCode::UNAUTHORIZED,
            ApiError::Access(AccessError::ForbiddenOrigin { .. }) => StatusCode::FORBIDDEN,
            ApiError::Access(AccessError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Session(SessionError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Session(SessionError::ForeignSession { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Session(SessionError::InternalDispatch { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn kind_and_code(&self) -> (&'static str, &'static str) {
        match self {
            ApiError::Access(AccessError::Authentication) => {
                ("authentication_error", "invalid_api_key")
            }
            ApiError::Access(AccessError::ForbiddenOrigin { .. }) => {
                ("permission_error", "origin_not_allowed")
            }
            ApiError::Access(AccessError::RateLimited) => ("rate_limit_error", "rate_limit_exceeded"),
            ApiError::Session(SessionError::NotFound { .. }) => {
                ("invalid_request_error", "session_not_found")
            }
            ApiError::Session(SessionError::ForeignSession { .. }) => {
                ("unavailable_error", "session_on_other_instance")
            }
            ApiError::Session(SessionError::InternalDispatch { .. }) => {
                ("server_error", "internal_error")
            }
            ApiError::BadRequest(_) => ("invalid_request_error", "bad_request"),
        }
    }

    /// Client-facing message. Internal dispatch details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            ApiError::Session(SessionError::InternalDispatch { .. }) => {
                "Internal error while handling message".to_string()
            }
            ApiError::Session(SessionError::ForeignSession { .. }) => {
                "Session is temporarily unavailable on this instance".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Attach CORS headers to the error response.
    pub fn with_cors(self, grant: Option<&CorsGrant>) -> Response {
        let mut response = self.into_response();
        if let Some(grant) = grant {
            grant.apply(response.headers_mut());
        }
        response
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (kind, code) = self.kind_and_code();
        let body = Json(json!({
            "error": {
                "message": self.public_message(),
                "type": kind,
                "code": code,
            }
        }));
        let mut headers = HeaderMap::new();
        if matches!(self, ApiError::Access(AccessError::RateLimited)) {
            headers.insert(axum::http::header::RETRY_AFTER, axum::http::HeaderValue::from_static("1"));
        }
        (self.status(), headers, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(AccessError::Authentication).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::from(AccessError::ForbiddenOrigin { origin: "x".into() }).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::from(AccessError::RateLimited).status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::from(SessionError::not_found("s")).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(SessionError::foreign("s")).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(SessionError::internal("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::bad_request("x").status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_details_not_exposed() {
        let err = ApiError::from(SessionError::internal("db password leaked"));
        assert!(!err.public_message().contains("password"));
    }
}
