pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod job;
pub mod optimizer;
pub mod poller;
pub mod store;
pub mod submitter;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{Asset, HttpJobApi, JobApi};
pub use config::ClientConfig;
pub use controller::{Controller, GenerationReport};
pub use error::{ClientError, Result};
pub use events::{AutopilotEvent, JobEvent, ZrEvent};
pub use job::{FailureReason, JobHandle, JobResult, JobState, Outcome};
pub use optimizer::{AutopilotConfig, Decision, MutationPolicy, Observation, OptimizationSession, Optimizer, StopReason};
pub use store::CandidateStore;
pub use submitter::{SingleFlight, Submitter};
