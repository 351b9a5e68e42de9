//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints, mapping controller errors to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use aftercare_agent::SupportError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 404 Not Found - unknown session.
    NotFound(String),
    /// 409 Conflict - the session is closed.
    Conflict(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<SupportError> for ApiError {
    fn from(err: SupportError) -> Self {
        match &err {
            SupportError::SessionNotFound(_) => ApiError::NotFound(err.to_string()),
            SupportError::SessionClosed(_) => ApiError::Conflict(err.to_string()),
            SupportError::EmptyMessage
            | SupportError::MessageTooLong(_)
            | SupportError::InvalidImage(_) => ApiError::BadRequest(err.to_string()),
            SupportError::InvalidTransition { .. } | SupportError::Storage(_) => {
                tracing::error!(error = %err, "Turn failed");
                ApiError::Internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_support_error_mapping() {
        let id = Uuid::new_v4();
        assert!(matches!(
            ApiError::from(SupportError::SessionNotFound(id)),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(SupportError::SessionClosed(id)),
            ApiError::Conflict(_)
        ));
        assert!(matches!(
            ApiError::from(SupportError::MessageTooLong(10)),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(SupportError::InvalidImage("local path".into())),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(SupportError::Storage("disk".into())),
            ApiError::Internal(_)
        ));
    }

    #[test]
    fn test_error_status_codes() {
        let response = ApiError::Conflict("closed".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let response = ApiError::NotFound("gone".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
