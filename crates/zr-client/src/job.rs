use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use zr_core::{Artifact, JobParams, Metrics, Pipeline, Progress};

use crate::error::ClientError;
use crate::submitter::FlightGuard;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Submitted,
    Polling,
    Success,
    Failure,
}

impl JobState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Submitted | Self::Polling)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Client-side view of one remote job.
///
/// Holds the controller's single-flight guard while non-terminal. The guard
/// is released when the poller moves the handle to a terminal state, or when
/// the handle is dropped, whichever happens first.
#[derive(Debug)]
pub struct JobHandle {
    job_id: String,
    params: JobParams,
    state: JobState,
    percent: u8,
    status_text: Option<String>,
    preview: Option<Vec<u8>>,
    submitted_at: Instant,
    guard: Option<FlightGuard>,
}

impl JobHandle {
    pub(crate) fn new(job_id: String, params: JobParams, guard: FlightGuard) -> Self {
        Self {
            job_id,
            params,
            state: JobState::Submitted,
            percent: 0,
            status_text: None,
            preview: None,
            submitted_at: Instant::now(),
            guard: Some(guard),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn pipeline(&self) -> Pipeline {
        self.params.pipeline()
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn status_text(&self) -> Option<&str> {
        self.status_text.as_deref()
    }

    pub fn preview(&self) -> Option<&[u8]> {
        self.preview.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.submitted_at.elapsed()
    }

    pub(crate) fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub(crate) fn mark_polling(&mut self) {
        if self.state == JobState::Submitted {
            self.state = JobState::Polling;
        }
    }

    pub(crate) fn observe(&mut self, progress: &Progress) {
        self.mark_polling();
        self.percent = progress.percent;
        self.status_text = Some(progress.status_code.clone());
        if progress.preview.is_some() {
            self.preview = progress.preview.clone();
        }
    }

    /// Moves to a terminal state, drops the preview and frees the flight lock.
    pub(crate) fn finish(&mut self, state: JobState) {
        debug_assert!(state.is_terminal());
        self.state = state;
        if state == JobState::Success {
            self.percent = 100;
        }
        self.preview = None;
        self.guard.take();
    }
}

/// Materialized result of a successful job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub job_id: String,
    pub artifact: Artifact,
    pub metrics: Metrics,
}

/// Why a job ended without a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The engine reported `FAILURE`.
    Engine,
    /// No terminal state within the configured deadline.
    Timeout(Duration),
    Cancelled,
    /// Too many consecutive transient poll errors, or a hard result-fetch error.
    Unreachable(String),
    /// Result payload could not be decoded.
    Malformed(String),
}

/// The single terminal report delivered per job.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(JobResult),
    Failure { job_id: String, reason: FailureReason },
}

impl Outcome {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Success(result) => &result.job_id,
            Self::Failure { job_id, .. } => job_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_result(self) -> Result<JobResult, ClientError> {
        match self {
            Self::Success(result) => Ok(result),
            Self::Failure { job_id, reason } => Err(match reason {
                FailureReason::Engine => ClientError::EngineFailure { job_id },
                FailureReason::Timeout(after) => ClientError::Timeout { job_id, after },
                FailureReason::Cancelled => ClientError::Cancelled { job_id },
                FailureReason::Unreachable(reason) => ClientError::Unreachable { job_id, reason },
                FailureReason::Malformed(msg) => ClientError::Decode(msg),
            }),
        }
    }
}
