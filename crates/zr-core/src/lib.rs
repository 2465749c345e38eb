mod analysis;
mod candidate;
pub mod error;
mod metrics;
mod params;
mod pipeline;
pub mod progress;

pub use analysis::{AnalysisReport, Recommendations};
pub use candidate::{decode_b64, Artifact, Candidate};
pub use metrics::Metrics;
pub use params::{AnimationParams, JobParams, ParamBounds, ParameterSet, Range};
pub use pipeline::Pipeline;
pub use progress::{Phase, Progress};
