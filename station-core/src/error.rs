use thiserror::Error;

/// Failures that callers need to tell apart (the REST layer maps each to a status).
#[derive(Debug, Error)]
pub enum StationError {
    #[error("{0}")]
    NotFound(String),

    #[error("setting '{0}' is not set")]
    MissingSetting(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("external weather provider failed: {0}")]
    Upstream(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = StationError> = std::result::Result<T, E>;
