use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("logging enable/disable rejected: {0}")]
    LoggingTransitionRejected(String),

    #[error("timed out waiting for logging to drain: {0}")]
    DrainTimeout(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        DbError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
