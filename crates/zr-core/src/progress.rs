use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Human-readable stage of a running job, decoded from the engine's status code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Initializing,
    LoadingWeights,
    AllocatingMemory,
    Synthesizing,
    Finalizing,
    DecodingInput,
    Animating,
    EncodingVideo,
    /// Code this client does not know; kept verbatim.
    Other(String),
}

impl Phase {
    pub fn from_code(code: &str) -> Self {
        match code {
            "INITIALIZING" => Self::Initializing,
            "LOADING_WEIGHTS" => Self::LoadingWeights,
            "ALLOCATING_MEMORY" | "ALLOCATING_VRAM" => Self::AllocatingMemory,
            "SYNTHESIZING" | "SYNTHESIZING_IMAGE" => Self::Synthesizing,
            "FINALIZING" => Self::Finalizing,
            "DECODING_MANIFOLD" => Self::DecodingInput,
            "ANIMATING" => Self::Animating,
            "ENCODING_CONTAINER" => Self::EncodingVideo,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Initializing => "initializing",
            Self::LoadingWeights => "loading weights",
            Self::AllocatingMemory => "allocating memory",
            Self::Synthesizing => "synthesizing",
            Self::Finalizing => "finalizing",
            Self::DecodingInput => "decoding input",
            Self::Animating => "animating",
            Self::EncodingVideo => "encoding video",
            Self::Other(code) => code,
        }
    }
}

/// One decoded progress report from the status endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub job_id: String,
    /// 0..=100
    pub percent: u8,
    pub status_code: String,
    pub phase: Phase,
    /// Decoded low-resolution preview, if the engine attached one.
    pub preview: Option<Vec<u8>>,
    pub elapsed: Duration,
    /// Advisory only.
    pub eta: Option<Duration>,
}

impl Progress {
    pub fn new(job_id: impl Into<String>, percent: u8, status_code: impl Into<String>, elapsed: Duration) -> Self {
        let status_code = status_code.into();
        let percent = percent.min(100);
        Self {
            job_id: job_id.into(),
            percent,
            phase: Phase::from_code(&status_code),
            status_code,
            preview: None,
            elapsed,
            eta: estimate_remaining(elapsed, percent),
        }
    }

    pub fn with_preview(mut self, preview: Option<Vec<u8>>) -> Self {
        self.preview = preview;
        self
    }
}

/// Linear extrapolation of the remaining time from elapsed time and percentage.
pub fn estimate_remaining(elapsed: Duration, percent: u8) -> Option<Duration> {
    if percent == 0 {
        return None;
    }
    if percent >= 100 {
        return Some(Duration::ZERO);
    }
    let pct = f64::from(percent);
    Some(elapsed.mul_f64((100.0 - pct) / pct))
}
