use serde::{Deserialize, Serialize};

use crate::params::{ParamBounds, ParameterSet};

/// Parameters suggested by the engine's heuristic analysis of a source image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub steps: u32,
    pub cfg_scale: f64,
    pub cn_scale_depth: f64,
    pub cn_scale_pose: f64,
    pub strength: f64,
    #[serde(default)]
    pub canny_low: Option<u32>,
    #[serde(default)]
    pub canny_high: Option<u32>,
    #[serde(default)]
    pub texture_prompt: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
}

/// Full `/analyze` response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub detected_essence: String,
    pub recommendations: Recommendations,
}

impl Recommendations {
    /// Overlays the recommendations on `base` and clamps the result.
    ///
    /// The texture prompt only fills `feature_prompt` when the caller left it
    /// empty.
    pub fn apply_to(&self, base: &ParameterSet, bounds: &ParamBounds) -> ParameterSet {
        let mut params = ParameterSet {
            steps: self.steps,
            cfg_scale: self.cfg_scale,
            depth: self.cn_scale_depth,
            pose: self.cn_scale_pose,
            strength: self.strength,
            canny_low: self.canny_low.unwrap_or(base.canny_low),
            canny_high: self.canny_high.unwrap_or(base.canny_high),
            ..base.clone()
        };

        if params.feature_prompt.is_empty() {
            if let Some(texture) = &self.texture_prompt {
                params.feature_prompt = texture.clone();
            }
        }
        if let Some(negative) = &self.negative_prompt {
            params.negative_prompt = negative.clone();
        }

        params.clamped(bounds)
    }
}
