use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Quality report attached to a finished job.
///
/// Scores are opaque server-side values. Video results omit the two
/// similarity scores, which then default to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub structural_similarity: f64,
    #[serde(default)]
    pub identity_preservation: f64,
    #[serde(default)]
    pub inference_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textural_realism: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    /// Any metric the engine reports that this client does not model.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Metrics {
    pub fn new(structural_similarity: f64, identity_preservation: f64, inference_time: f64) -> Self {
        Self {
            structural_similarity,
            identity_preservation,
            inference_time,
            textural_realism: None,
            total_frames: None,
            fps: None,
            extra: BTreeMap::new(),
        }
    }

    /// Unweighted mean of structural similarity and identity preservation.
    pub fn fitness(&self) -> f64 {
        (self.structural_similarity + self.identity_preservation) / 2.0
    }
}
