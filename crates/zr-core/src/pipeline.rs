use serde::{Deserialize, Serialize};

/// Endpoint family a job is submitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    /// Still image img2img synthesis
    Transform,
    /// Temporal (video clip) synthesis
    Animate,
}

impl Pipeline {
    /// Name for display
    pub fn name(&self) -> &'static str {
        match self {
            Self::Transform => "Transform",
            Self::Animate => "Animate",
        }
    }

    /// Submission path on the remote API
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Transform => "/transform",
            Self::Animate => "/animate",
        }
    }

    /// File extension used when an artifact of this pipeline is saved
    pub fn default_extension(&self) -> &'static str {
        match self {
            Self::Transform => "png",
            Self::Animate => "mp4",
        }
    }
}
