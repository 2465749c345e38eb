use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use zr_core::Metrics;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitResponse {
    pub task_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default)]
    pub progress: Option<ProgressPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProgressPayload {
    #[serde(default)]
    pub percent: f64,
    #[serde(default)]
    pub status_text: Option<String>,
    #[serde(default)]
    pub preview_b64: Option<String>,
}

/// Lifecycle class of a raw status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Running,
    Success,
    Failure,
}

impl StatusResponse {
    pub fn state(&self) -> RemoteState {
        match self.status.as_str() {
            "SUCCESS" => RemoteState::Success,
            "FAILURE" | "REVOKED" => RemoteState::Failure,
            // PENDING, STARTED, PROGRESS, RETRY and anything unknown
            _ => RemoteState::Running,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultPayload {
    #[serde(default)]
    pub result_image_b64: Option<String>,
    #[serde(default)]
    pub video_b64: Option<String>,
    pub metrics: Metrics,
}

/// Answer of the result endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultFetch {
    /// `202`: the result is not materialized yet.
    Pending,
    Ready(ResultPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    #[serde(default)]
    pub hardware: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnlockResponse {
    #[serde(default)]
    pub message: String,
}
