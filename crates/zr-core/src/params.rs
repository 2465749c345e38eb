use serde::{Deserialize, Serialize};

/// Closed interval `[min, max]` for one tunable weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    pub fn clamp(&self, value: f64) -> f64 {
        // NaN would slip through f64::clamp, pin it to the lower bound
        if value.is_nan() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Hard limits every `ParameterSet` must respect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamBounds {
    pub depth: Range,
    pub pose: Range,
    pub strength: Range,
    /// Seeds live in `0..seed_modulus`.
    pub seed_modulus: u64,
}

impl Default for ParamBounds {
    fn default() -> Self {
        Self {
            depth: Range::new(0.2, 1.2),
            pose: Range::new(0.2, 0.8),
            strength: Range::new(0.4, 1.0),
            seed_modulus: 2_147_483_647,
        }
    }
}

/// Inputs for one still-image generation attempt.
///
/// `depth`, `pose`, `strength` and `seed` are the axes the autopilot moves;
/// everything else is passed through to the engine untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub character_name: String,
    pub feature_prompt: String,
    pub resolution_anchor: u32,
    pub steps: u32,
    pub cfg_scale: f64,
    /// Structural (depth ControlNet) anchor weight.
    pub depth: f64,
    /// Pose (OpenPose ControlNet) anchor weight.
    pub pose: f64,
    /// Img2img denoising strength.
    pub strength: f64,
    pub canny_low: u32,
    pub canny_high: u32,
    pub seed: u64,
    pub negative_prompt: String,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            character_name: String::new(),
            feature_prompt: String::new(),
            resolution_anchor: 512,
            steps: 30,
            cfg_scale: 7.5,
            depth: 0.75,
            pose: 0.40,
            strength: 0.70,
            canny_low: 100,
            canny_high: 200,
            seed: 42,
            negative_prompt: "anime, cartoon".to_string(),
        }
    }
}

impl ParameterSet {
    pub fn with_character(mut self, name: impl Into<String>) -> Self {
        self.character_name = name.into();
        self
    }

    /// Copy of `self` with every bounded field forced inside `bounds`.
    pub fn clamped(&self, bounds: &ParamBounds) -> Self {
        Self {
            depth: bounds.depth.clamp(self.depth),
            pose: bounds.pose.clamp(self.pose),
            strength: bounds.strength.clamp(self.strength),
            seed: self.seed % bounds.seed_modulus.max(1),
            ..self.clone()
        }
    }

    pub fn is_within(&self, bounds: &ParamBounds) -> bool {
        bounds.depth.contains(self.depth)
            && bounds.pose.contains(self.pose)
            && bounds.strength.contains(self.strength)
            && self.seed < bounds.seed_modulus
    }

    /// Multipart form fields in the order the `/transform` endpoint declares them.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("character_name", self.character_name.clone()),
            ("feature_prompt", self.feature_prompt.clone()),
            ("resolution_anchor", self.resolution_anchor.to_string()),
            ("steps", self.steps.to_string()),
            ("cfg_scale", self.cfg_scale.to_string()),
            ("cn_depth", self.depth.to_string()),
            ("cn_pose", self.pose.to_string()),
            ("strength", self.strength.to_string()),
            ("canny_low", self.canny_low.to_string()),
            ("canny_high", self.canny_high.to_string()),
            ("seed", self.seed.to_string()),
            ("negative_prompt", self.negative_prompt.clone()),
        ]
    }
}

/// Inputs for the temporal (video) variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationParams {
    pub character_name: String,
    pub motion_prompt: String,
    pub duration_frames: u32,
    pub fps: u32,
    pub motion_bucket: u32,
    pub denoising_strength: f64,
    pub seed: u64,
}

impl Default for AnimationParams {
    fn default() -> Self {
        Self {
            character_name: String::new(),
            motion_prompt: "subtle realistic movement, breathing".to_string(),
            duration_frames: 24,
            fps: 8,
            motion_bucket: 127,
            denoising_strength: 0.20,
            seed: 42,
        }
    }
}

impl AnimationParams {
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("character_name", self.character_name.clone()),
            ("motion_prompt", self.motion_prompt.clone()),
            ("duration_frames", self.duration_frames.to_string()),
            ("fps", self.fps.to_string()),
            ("motion_bucket", self.motion_bucket.to_string()),
            ("denoising_strength", self.denoising_strength.to_string()),
            ("seed", self.seed.to_string()),
        ]
    }
}

/// The exact parameters a job was submitted with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobParams {
    Transform(ParameterSet),
    Animate(AnimationParams),
}

impl JobParams {
    pub fn pipeline(&self) -> crate::Pipeline {
        match self {
            Self::Transform(_) => crate::Pipeline::Transform,
            Self::Animate(_) => crate::Pipeline::Animate,
        }
    }

    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Transform(p) => p.form_fields(),
            Self::Animate(p) => p.form_fields(),
        }
    }

    pub fn parameter_set(&self) -> Option<&ParameterSet> {
        match self {
            Self::Transform(p) => Some(p),
            Self::Animate(_) => None,
        }
    }
}
