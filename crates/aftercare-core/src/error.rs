use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the Aftercare workspace.
///
/// Subsystem crates keep their own error enums and convert into this one
/// where they cross the storage or configuration boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AftercareError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Session closed: {0}")]
    SessionClosed(Uuid),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl From<toml::de::Error> for AftercareError {
    fn from(err: toml::de::Error) -> Self {
        AftercareError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AftercareError {
    fn from(err: toml::ser::Error) -> Self {
        AftercareError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AftercareError {
    fn from(err: serde_json::Error) -> Self {
        AftercareError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Aftercare operations.
pub type Result<T> = std::result::Result<T, AftercareError>;
