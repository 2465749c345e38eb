use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Local state forbids the call; nothing was sent.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Server-side hardware mutex held by another caller (HTTP 429).
    #[error("Synthesis engine is busy, try again later")]
    Busy,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Job {job_id} failed on the engine")]
    EngineFailure { job_id: String },

    #[error("Job {job_id} did not finish within {after:?}")]
    Timeout { job_id: String, after: Duration },

    #[error("Job {job_id} was cancelled")]
    Cancelled { job_id: String },

    #[error("Job {job_id} unreachable: {reason}")]
    Unreachable { job_id: String, reason: String },

    #[error("Candidate for job {0} already recorded")]
    DuplicateCandidate(String),

    #[error("No candidate for job {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Errors a poll tick may absorb and retry on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http { .. } | Self::Decode(_))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<zr_core::error::CoreError> for ClientError {
    fn from(err: zr_core::error::CoreError) -> Self {
        Self::Decode(err.to_string())
    }
}
