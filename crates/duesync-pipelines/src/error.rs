use duesync_core::ErrorCategory;
use duesync_http::ClientError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("upstream rate-locked the client")]
    RateLocked,
    #[error("permanent upstream failure: {0}")]
    Permanent(String),
    #[error("transient upstream failure: {0}")]
    Transient(String),
    #[error("authentication failure: {0}")]
    Authentication(String),
    #[error("payload did not normalize: {0}")]
    Normalizer(#[from] duesync_normalizer::NormalizerError),
    #[error("store failure: {0}")]
    Store(#[from] duesync_store::StoreError),
    #[error("run was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Maps a per-DUE error onto the broad category the final run summary
    /// groups by.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            PipelineError::RateLocked => Some(ErrorCategory::RateLocked),
            PipelineError::Permanent(_) => Some(ErrorCategory::Permanent),
            PipelineError::Transient(_) => Some(ErrorCategory::Transient),
            PipelineError::Normalizer(_) => Some(ErrorCategory::Normalizer),
            PipelineError::Store(_) => Some(ErrorCategory::Store),
            // Authentication and cancellation abort the run rather than
            // being recorded as a per-DUE skip.
            PipelineError::Authentication(_) | PipelineError::Cancelled => None,
        }
    }
}

impl From<ClientError> for PipelineError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::RateLocked => PipelineError::RateLocked,
            ClientError::Permanent { status, body } => {
                PipelineError::Permanent(format!("HTTP {status}: {body}"))
            }
            ClientError::Transient(msg) => PipelineError::Transient(msg),
            ClientError::Auth(e) => PipelineError::Authentication(e.to_string()),
            ClientError::Decode(msg) => PipelineError::Permanent(format!("undecodable response: {msg}")),
        }
    }
}
