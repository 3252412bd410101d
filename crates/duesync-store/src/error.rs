use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Pool exhaustion or the reconnect-with-retry loop ran out of attempts.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("invalid stored value: {0}")]
    Invalid(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
