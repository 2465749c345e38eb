use std::env;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;
use zr_core::{Metrics, ParamBounds, ParameterSet};

use crate::config::parse_or;
use crate::error::{ClientError, Result};

/// Step sizes, thresholds and bounds of the autopilot's mutation rule.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationPolicy {
    pub bounds: ParamBounds,
    /// Below this structural similarity, `depth` is pushed up.
    pub fidelity_threshold: f64,
    /// Below this identity preservation, `strength` is pulled down;
    /// otherwise it creeps up.
    pub identity_threshold: f64,
    pub depth_step: f64,
    pub strength_down_step: f64,
    pub strength_up_step: f64,
    /// Half-width of the uniform noise added to `pose`.
    pub pose_jitter: f64,
    pub resubmit_delay_min: Duration,
    pub resubmit_delay_max: Duration,
}

impl Default for MutationPolicy {
    fn default() -> Self {
        Self {
            bounds: ParamBounds::default(),
            fidelity_threshold: 0.88,
            identity_threshold: 0.90,
            depth_step: 0.03,
            strength_down_step: 0.02,
            strength_up_step: 0.01,
            pose_jitter: 0.025,
            resubmit_delay_min: Duration::from_millis(600),
            resubmit_delay_max: Duration::from_millis(1000),
        }
    }
}

impl MutationPolicy {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let policy = Self {
            bounds: d.bounds,
            fidelity_threshold: parse_or(&lookup, "ZR_FIDELITY_THRESHOLD", d.fidelity_threshold)?,
            identity_threshold: parse_or(&lookup, "ZR_IDENTITY_THRESHOLD", d.identity_threshold)?,
            depth_step: parse_or(&lookup, "ZR_DEPTH_STEP", d.depth_step)?,
            strength_down_step: parse_or(&lookup, "ZR_STRENGTH_DOWN_STEP", d.strength_down_step)?,
            strength_up_step: parse_or(&lookup, "ZR_STRENGTH_UP_STEP", d.strength_up_step)?,
            pose_jitter: parse_or(&lookup, "ZR_POSE_JITTER", d.pose_jitter)?,
            resubmit_delay_min: Duration::from_millis(parse_or(&lookup, "ZR_RESUBMIT_DELAY_MIN_MS", 600)?),
            resubmit_delay_max: Duration::from_millis(parse_or(&lookup, "ZR_RESUBMIT_DELAY_MAX_MS", 1000)?),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.fidelity_threshold) || !unit.contains(&self.identity_threshold) {
            return Err(ClientError::Config("metric thresholds must lie in [0, 1]".into()));
        }
        let b = &self.bounds;
        let steps = [
            ("ZR_DEPTH_STEP", self.depth_step, b.depth.width()),
            ("ZR_STRENGTH_DOWN_STEP", self.strength_down_step, b.strength.width()),
            ("ZR_STRENGTH_UP_STEP", self.strength_up_step, b.strength.width()),
            ("ZR_POSE_JITTER", self.pose_jitter, b.pose.width()),
        ];
        for (key, step, limit) in steps {
            // also rejects NaN
            if !(0.0..=limit).contains(&step) {
                return Err(ClientError::Config(format!("{key} must lie in [0, {limit}], got {step}")));
            }
        }
        if self.resubmit_delay_min > self.resubmit_delay_max {
            return Err(ClientError::Config("resubmit delay min exceeds max".into()));
        }
        Ok(())
    }
}

/// Per-run knobs of an autopilot session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutopilotConfig {
    pub target_threshold: f64,
    pub max_attempts: u32,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            target_threshold: 0.92,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    TargetReached,
    BudgetExhausted,
    EngineFailure,
    Busy,
    Timeout,
    Cancelled,
    /// Transport failure, unreachable engine or local I/O error.
    NetworkError,
    /// The engine answered with a payload that could not be decoded.
    MalformedResponse,
    /// A local check refused the run (precondition, duplicate, config).
    Rejected,
    /// `step` was called on a session that had already stopped.
    Inactive,
}

impl StopReason {
    /// Session-ending reason for an error raised while the session was running.
    pub fn from_error(err: &ClientError) -> Self {
        match err {
            ClientError::EngineFailure { .. } => Self::EngineFailure,
            ClientError::Busy => Self::Busy,
            ClientError::Timeout { .. } => Self::Timeout,
            ClientError::Cancelled { .. } => Self::Cancelled,
            ClientError::Decode(_) => Self::MalformedResponse,
            ClientError::Network(_)
            | ClientError::Http { .. }
            | ClientError::Unreachable { .. }
            | ClientError::Io(_) => Self::NetworkError,
            ClientError::Precondition(_)
            | ClientError::DuplicateCandidate(_)
            | ClientError::NotFound(_)
            | ClientError::Config(_) => Self::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Stop(StopReason),
    Continue(ParameterSet),
}

/// What the optimizer learns from one finished job.
#[derive(Debug, Clone, Copy)]
pub enum Observation<'a> {
    Completed {
        job_id: &'a str,
        metrics: &'a Metrics,
        params: &'a ParameterSet,
    },
    Failed(StopReason),
}

/// State of one autopilot run.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationSession {
    id: Uuid,
    active: bool,
    attempt: u32,
    max_attempts: u32,
    target_threshold: f64,
    best_score: f64,
    candidates: Vec<String>,
    stop_reason: Option<StopReason>,
}

impl OptimizationSession {
    pub fn start(config: AutopilotConfig) -> Result<Self> {
        if config.max_attempts == 0 {
            return Err(ClientError::Precondition("autopilot needs at least one attempt".into()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            active: true,
            attempt: 0,
            max_attempts: config.max_attempts,
            target_threshold: config.target_threshold,
            best_score: 0.0,
            candidates: Vec::new(),
            stop_reason: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn target_threshold(&self) -> f64 {
        self.target_threshold
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    /// Job ids of the candidates produced in this session, oldest first.
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub(crate) fn stop(&mut self, reason: StopReason) {
        if self.active {
            info!("Autopilot session {} stopped: {:?}", self.id, reason);
            self.active = false;
            self.stop_reason = Some(reason);
        }
    }
}

/// Bounded, noisy hill climber over `depth`/`strength` with `seed`/`pose` exploration.
pub struct Optimizer<R = StdRng> {
    policy: MutationPolicy,
    rng: R,
}

impl Optimizer<StdRng> {
    pub fn new(policy: MutationPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_os_rng())
    }
}

impl<R: Rng> Optimizer<R> {
    pub fn with_rng(policy: MutationPolicy, rng: R) -> Self {
        Self { policy, rng }
    }

    pub fn policy(&self) -> &MutationPolicy {
        &self.policy
    }

    pub fn step(&mut self, session: &mut OptimizationSession, observation: Observation<'_>) -> Decision {
        if !session.active {
            return Decision::Stop(StopReason::Inactive);
        }

        let (job_id, metrics, params) = match observation {
            Observation::Failed(reason) => {
                session.stop(reason);
                return Decision::Stop(reason);
            }
            Observation::Completed {
                job_id,
                metrics,
                params,
            } => (job_id, metrics, params),
        };

        session.attempt += 1;
        session.candidates.push(job_id.to_string());
        let fitness = metrics.fitness();
        session.best_score = session.best_score.max(fitness);
        info!(
            "Autopilot attempt {}/{}: fitness {:.3} (best {:.3}, target {:.3})",
            session.attempt, session.max_attempts, fitness, session.best_score, session.target_threshold
        );

        if fitness >= session.target_threshold {
            session.stop(StopReason::TargetReached);
            return Decision::Stop(StopReason::TargetReached);
        }
        if session.attempt >= session.max_attempts {
            session.stop(StopReason::BudgetExhausted);
            return Decision::Stop(StopReason::BudgetExhausted);
        }

        Decision::Continue(self.mutate(params, metrics))
    }

    /// Next parameter set. `inference_time` is never consulted.
    pub fn mutate(&mut self, params: &ParameterSet, metrics: &Metrics) -> ParameterSet {
        let p = &self.policy;
        let b = &p.bounds;
        let mut next = params.clamped(b);

        if metrics.structural_similarity < p.fidelity_threshold {
            next.depth = b.depth.clamp(next.depth + p.depth_step);
        }
        if metrics.identity_preservation < p.identity_threshold {
            next.strength = b.strength.clamp(next.strength - p.strength_down_step);
        } else {
            next.strength = b.strength.clamp(next.strength + p.strength_up_step);
        }

        next.seed = self.rng.random_range(0..b.seed_modulus.max(1));
        let noise = if p.pose_jitter > 0.0 {
            self.rng.random_range(-p.pose_jitter..=p.pose_jitter)
        } else {
            0.0
        };
        next.pose = b.pose.clamp(next.pose + noise);

        debug!(
            "Mutated depth {:.3}->{:.3}, strength {:.3}->{:.3}, pose {:.3}->{:.3}, seed {}",
            params.depth, next.depth, params.strength, next.strength, params.pose, next.pose, next.seed
        );
        next
    }

    /// Pause before resubmitting, drawn from the configured range.
    pub fn resubmit_delay(&mut self) -> Duration {
        let (lo, hi) = (self.policy.resubmit_delay_min, self.policy.resubmit_delay_max);
        if lo >= hi {
            return lo;
        }
        let ms = self.rng.random_range(lo.as_millis()..=hi.as_millis());
        Duration::from_millis(ms as u64)
    }
}
