//! Error types for the support agent.

use aftercare_core::error::AftercareError;
use aftercare_core::types::RoutingState;
use uuid::Uuid;

/// Errors surfaced by [`crate::SupportController`].
///
/// Handler and adapter failures never appear here: they become outcomes and
/// the turn still produces a reply.
#[derive(Debug, thiserror::Error)]
pub enum SupportError {
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),
    #[error("session closed: {0}")]
    SessionClosed(Uuid),
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("image not accepted: {0}")]
    InvalidImage(String),
    #[error("invalid routing transition: {from} -> {to}")]
    InvalidTransition { from: RoutingState, to: RoutingState },
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<AftercareError> for SupportError {
    fn from(err: AftercareError) -> Self {
        match err {
            AftercareError::SessionNotFound(id) => SupportError::SessionNotFound(id),
            AftercareError::SessionClosed(id) => SupportError::SessionClosed(id),
            other => SupportError::Storage(other.to_string()),
        }
    }
}
