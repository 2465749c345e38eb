use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::metrics::Metrics;
use crate::params::JobParams;

/// Generated media returned by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "bytes", rename_all = "snake_case")]
pub enum Artifact {
    Image(Vec<u8>),
    Video(Vec<u8>),
}

impl Artifact {
    /// Picks the image payload if present, the video payload otherwise.
    pub fn from_b64(image_b64: Option<&str>, video_b64: Option<&str>) -> Result<Self> {
        match (image_b64, video_b64) {
            (Some(image), _) => Ok(Self::Image(decode_b64(image)?)),
            (None, Some(video)) => Ok(Self::Video(decode_b64(video)?)),
            (None, None) => Err(CoreError::MissingArtifact),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Image(b) | Self::Video(b) => b,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video(_))
    }
}

/// Decodes standard base64, tolerating a `data:*;base64,` prefix.
pub fn decode_b64(payload: &str) -> Result<Vec<u8>> {
    let raw = match payload.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    Ok(STANDARD.decode(raw.trim())?)
}

/// Immutable record of one successfully finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    job_id: String,
    artifact: Artifact,
    metrics: Metrics,
    params: JobParams,
    created_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(job_id: impl Into<String>, artifact: Artifact, metrics: Metrics, params: JobParams) -> Self {
        Self {
            job_id: job_id.into(),
            artifact,
            metrics,
            params,
            created_at: Utc::now(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn fitness(&self) -> f64 {
        self.metrics.fitness()
    }
}
