//! Errors raised while talking to the remote synthesis API.

use std::time::Duration;
use thiserror::Error;

use super::models::TaskStatus;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The API answered with a non-zero application code.
    #[error("Remote API error {code}: {message}")]
    RemoteApi {
        code: i64,
        message: String,
        raw: String,
    },

    /// The API answered with a non-2xx HTTP status.
    #[error("Transport error: HTTP {status}: {body}")]
    Transport { status: u16, body: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Generation failed for task {task_id}: {raw}")]
    GenerationFailed { task_id: String, raw: String },

    #[error("Unexpected status {status} for task {task_id}: {raw}")]
    UnexpectedStatus {
        task_id: String,
        status: i64,
        raw: String,
    },

    #[error("Timed out waiting for task {task_id} after {attempts} polls ({elapsed:?})")]
    Timeout {
        task_id: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("Polling of task {task_id} was cancelled")]
    Cancelled { task_id: String },

    #[error("Invalid task transition from {from:?} to {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

impl RemoteError {
    /// Whether repeating the same call may succeed.
    ///
    /// Application-level errors (non-zero `Code`) are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Connection(_) => true,
            RemoteError::Transport { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Short label used for metrics and API error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::Configuration(_) => "configuration",
            RemoteError::RemoteApi { .. } => "remote_api",
            RemoteError::Transport { .. } => "transport",
            RemoteError::Connection(_) => "connection",
            RemoteError::InvalidResponse(_) => "invalid_response",
            RemoteError::GenerationFailed { .. } => "generation_failed",
            RemoteError::UnexpectedStatus { .. } => "unexpected_status",
            RemoteError::Timeout { .. } => "timeout",
            RemoteError::Cancelled { .. } => "cancelled",
            RemoteError::InvalidTransition { .. } => "invalid_transition",
        }
    }

    /// Remote payload attached to the error, if any.
    pub fn raw_payload(&self) -> Option<&str> {
        match self {
            RemoteError::RemoteApi { raw, .. }
            | RemoteError::GenerationFailed { raw, .. }
            | RemoteError::UnexpectedStatus { raw, .. } => Some(raw),
            RemoteError::Transport { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            RemoteError::Transport {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else if err.is_decode() {
            RemoteError::InvalidResponse(err.to_string())
        } else {
            RemoteError::Connection(err.to_string())
        }
    }
}
