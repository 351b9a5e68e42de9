use std::time::Duration;

use thiserror::Error;

/// Failure of one external service call.
///
/// Retry eligibility is decided here, once, by [`ServiceError::is_retryable`].
/// Callers above the adapter boundary only ever see the final outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    /// Network failure or 5xx; worth another attempt.
    #[error("Transient service error: {0}")]
    Transient(String),

    /// A single attempt exceeded its time budget.
    #[error("Service call timed out after {0:?}")]
    Timeout(Duration),

    /// The referenced entity does not exist (e.g. unknown order id).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The service could not process the input (e.g. unreadable image).
    #[error("Unprocessable input: {0}")]
    Unprocessable(String),

    /// Definitive rejection by the service.
    #[error("Permanent service error: {0}")]
    Permanent(String),
}

impl ServiceError {
    /// Whether the adapter may retry the call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Transient(_) | ServiceError::Timeout(_))
    }

    /// Map an HTTP status code to an error.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            404 => ServiceError::NotFound(body),
            422 => ServiceError::Unprocessable(body),
            408 | 429 => ServiceError::Transient(format!("HTTP {}: {}", status, body)),
            s if s >= 500 => ServiceError::Transient(format!("HTTP {}: {}", s, body)),
            s => ServiceError::Permanent(format!("HTTP {}: {}", s, body)),
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            ServiceError::Transient(err.to_string())
        } else if err.is_decode() {
            ServiceError::Permanent(format!("Malformed response: {}", err))
        } else if let Some(status) = err.status() {
            ServiceError::from_status(status.as_u16(), err.to_string())
        } else {
            ServiceError::Transient(err.to_string())
        }
    }
}
