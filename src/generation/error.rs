use thiserror::Error;

use crate::cache::CacheError;
use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Submission failed: {0}")]
    Submit(#[source] RemoteError),

    #[error("Polling failed: {0}")]
    Poll(#[source] RemoteError),

    #[error("Caching failed: {0}")]
    Cache(#[source] CacheError),

    #[error("Generation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Name of the pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            GenerationError::InvalidRequest(_) => "request",
            GenerationError::Submit(_) => "submit",
            GenerationError::Poll(_) => "poll",
            GenerationError::Cache(_) => "cache",
            GenerationError::Cancelled => "cancelled",
        }
    }

    /// Raw remote payload of the failure, when the remote API sent one.
    pub fn raw_payload(&self) -> Option<&str> {
        match self {
            GenerationError::Submit(err) | GenerationError::Poll(err) => err.raw_payload(),
            _ => None,
        }
    }

    pub(crate) fn from_poll(err: RemoteError) -> Self {
        match err {
            RemoteError::Cancelled { .. } => GenerationError::Cancelled,
            other => GenerationError::Poll(other),
        }
    }

    pub(crate) fn from_cache(err: CacheError) -> Self {
        match err {
            CacheError::Cancelled => GenerationError::Cancelled,
            other => GenerationError::Cache(other),
        }
    }
}
