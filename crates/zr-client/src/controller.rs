use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;
use rand::rngs::StdRng;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use zr_core::{AnalysisReport, AnimationParams, Candidate, JobParams, ParameterSet};

use crate::api::schemas::HealthResponse;
use crate::api::{Asset, JobApi};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{AutopilotEvent, EventSink, JobEvent, ZrEvent};
use crate::job::{JobHandle, Outcome};
use crate::optimizer::{
    AutopilotConfig, Decision, MutationPolicy, Observation, OptimizationSession, Optimizer, StopReason,
};
use crate::poller::Poller;
use crate::store::CandidateStore;
use crate::submitter::{SingleFlight, Submitter};

/// What one top-level `generate` call produced.
#[derive(Debug, Clone)]
pub struct GenerationReport {
    /// Set when the run was an autopilot session.
    pub session_id: Option<Uuid>,
    /// Candidates of this run, oldest first.
    pub candidates: Vec<Candidate>,
    pub best: Option<Candidate>,
    pub stop_reason: Option<StopReason>,
}

type SessionSlot = Arc<Mutex<Option<OptimizationSession>>>;

fn lock(slot: &SessionSlot) -> MutexGuard<'_, Option<OptimizationSession>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stops the session it was armed for if the run ends while it is still
/// active, which only happens when the `generate` future is dropped.
struct SessionGuard {
    slot: SessionSlot,
    session_id: Uuid,
    events: EventSink,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut slot = lock(&self.slot);
        let Some(session) = slot.as_mut().filter(|s| s.id() == self.session_id && s.is_active()) else {
            return;
        };
        warn!("Autopilot session {} abandoned mid-run", self.session_id);
        session.stop(StopReason::Cancelled);
        self.events.autopilot(AutopilotEvent::Stopped {
            reason: StopReason::Cancelled,
            attempts: session.attempt(),
            best_score: session.best_score(),
        });
    }
}

/// One independent client: its own flight lock, history and autopilot state.
pub struct Controller<A, R = StdRng> {
    api: Arc<A>,
    flight: SingleFlight,
    submitter: Submitter<Arc<A>>,
    poller: Poller<Arc<A>>,
    store: CandidateStore,
    optimizer: Optimizer<R>,
    session: SessionSlot,
    events: EventSink,
}

impl<A: JobApi> Controller<A> {
    pub fn new(api: A, config: ClientConfig, policy: MutationPolicy) -> Self {
        Self::with_optimizer(api, config, Optimizer::new(policy))
    }
}

impl<A: JobApi, R: Rng> Controller<A, R> {
    pub fn with_optimizer(api: A, config: ClientConfig, optimizer: Optimizer<R>) -> Self {
        let api = Arc::new(api);
        let flight = SingleFlight::new();
        Self {
            submitter: Submitter::new(Arc::clone(&api), flight.clone()),
            poller: Poller::new(Arc::clone(&api), config),
            api,
            flight,
            store: CandidateStore::new(),
            optimizer,
            session: SessionSlot::default(),
            events: EventSink::default(),
        }
    }

    pub fn with_events(mut self, tx: UnboundedSender<ZrEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    pub fn store(&self) -> &CandidateStore {
        &self.store
    }

    /// Snapshot of the current or most recent autopilot session.
    pub fn session(&self) -> Option<OptimizationSession> {
        lock(&self.session).clone()
    }

    /// Whether a job is non-terminal right now.
    pub fn is_busy(&self) -> bool {
        self.flight.is_held()
    }

    pub async fn submit(&self, asset: &Asset, params: JobParams) -> Result<JobHandle> {
        let handle = self.submitter.submit(asset, params).await;
        match &handle {
            Ok(h) => self.events.job(JobEvent::Submitted {
                job_id: h.job_id().to_string(),
                pipeline: h.pipeline(),
            }),
            Err(err) => self.events.job(JobEvent::Failed {
                job_id: None,
                error: err.to_string(),
            }),
        }
        handle
    }

    pub async fn drive(&self, handle: &mut JobHandle, cancel: &CancellationToken) -> Outcome {
        let events = self.events.clone();
        let outcome = self
            .poller
            .drive(handle, cancel, |progress| events.job(JobEvent::Progress(progress.clone())))
            .await;

        match &outcome {
            Outcome::Success(result) => self.events.job(JobEvent::Completed {
                job_id: result.job_id.clone(),
                metrics: result.metrics.clone(),
            }),
            Outcome::Failure { job_id, reason } => self.events.job(JobEvent::Failed {
                job_id: Some(job_id.clone()),
                error: format!("{reason:?}"),
            }),
        }
        outcome
    }

    /// Submit, drive to completion and record one job.
    pub async fn run_job(&mut self, asset: &Asset, params: JobParams, cancel: &CancellationToken) -> Result<Candidate> {
        let mut handle = self.submit(asset, params).await?;
        let outcome = self.drive(&mut handle, cancel).await;
        let result = outcome.into_result()?;
        self.store.record(result, handle.params().clone())
    }

    /// Still-image generation, optionally under autopilot.
    ///
    /// Starting an autopilot run replaces any previous session. Every error
    /// stops the session before it is returned, and so does dropping the
    /// returned future; cancel through `cancel` to get a `Cancelled` error
    /// back instead.
    pub async fn generate(
        &mut self,
        asset: &Asset,
        params: ParameterSet,
        autopilot: Option<AutopilotConfig>,
        cancel: &CancellationToken,
    ) -> Result<GenerationReport> {
        let mut current = params.clamped(&self.optimizer.policy().bounds);

        let Some(autopilot) = autopilot else {
            let candidate = self.run_job(asset, JobParams::Transform(current), cancel).await?;
            return Ok(GenerationReport {
                session_id: None,
                best: Some(candidate.clone()),
                candidates: vec![candidate],
                stop_reason: None,
            });
        };

        let session = OptimizationSession::start(autopilot)?;
        let session_id = session.id();
        info!(
            "Autopilot session {} started: target {:.3}, budget {}",
            session_id, autopilot.target_threshold, autopilot.max_attempts
        );
        self.events.autopilot(AutopilotEvent::Started {
            session_id,
            target_threshold: autopilot.target_threshold,
            max_attempts: autopilot.max_attempts,
        });
        *lock(&self.session) = Some(session);
        let _abandoned = SessionGuard {
            slot: Arc::clone(&self.session),
            session_id,
            events: self.events.clone(),
        };

        let mut produced: Vec<Candidate> = Vec::new();
        let reason = loop {
            let candidate = match self.run_job(asset, JobParams::Transform(current.clone()), cancel).await {
                Ok(candidate) => candidate,
                Err(err) => {
                    self.observe(Observation::Failed(StopReason::from_error(&err)));
                    self.announce_stop();
                    return Err(err);
                }
            };

            let decision = self.observe(Observation::Completed {
                job_id: candidate.job_id(),
                metrics: candidate.metrics(),
                params: &current,
            });
            produced.push(candidate);

            match decision {
                Decision::Stop(reason) => break reason,
                Decision::Continue(next) => {
                    let attempt = lock(&self.session).as_ref().map_or(0, |s| s.attempt());
                    self.events.autopilot(AutopilotEvent::Mutated {
                        attempt,
                        next: next.clone(),
                    });

                    let delay = self.optimizer.resubmit_delay();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            warn!("Autopilot cancelled between attempts");
                            self.observe(Observation::Failed(StopReason::Cancelled));
                            self.announce_stop();
                            let job_id = produced.last().map(|c| c.job_id().to_string()).unwrap_or_default();
                            return Err(ClientError::Cancelled { job_id });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    current = next;
                }
            }
        };
        self.announce_stop();

        let best = self
            .store
            .best_of(produced.iter().map(|c| c.job_id()))
            .cloned();
        Ok(GenerationReport {
            session_id: Some(session_id),
            candidates: produced,
            best,
            stop_reason: Some(reason),
        })
    }

    /// Temporal variant. Never driven by the autopilot.
    pub async fn animate(
        &mut self,
        asset: &Asset,
        params: AnimationParams,
        cancel: &CancellationToken,
    ) -> Result<Candidate> {
        self.run_job(asset, JobParams::Animate(params), cancel).await
    }

    /// Asks the engine for recommended parameters and overlays them on `base`.
    pub async fn analyze(&self, asset: &Asset, base: &ParameterSet) -> Result<(AnalysisReport, ParameterSet)> {
        if asset.is_empty() {
            return Err(ClientError::Precondition("no source asset provided".into()));
        }
        let report = self.api.analyze(asset, &base.character_name).await?;
        info!("Analysis detected '{}'", report.detected_essence);
        let params = report.recommendations.apply_to(base, &self.optimizer.policy().bounds);
        Ok((report, params))
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.api.health().await
    }

    /// Operator override for a server-side lock left behind after `Busy`.
    pub async fn unlock(&self) -> Result<String> {
        self.api.unlock().await
    }

    fn observe(&mut self, observation: Observation<'_>) -> Decision {
        match lock(&self.session).as_mut() {
            Some(session) => self.optimizer.step(session, observation),
            None => Decision::Stop(StopReason::Inactive),
        }
    }

    fn announce_stop(&self) {
        if let Some(session) = lock(&self.session).as_ref() {
            if let Some(reason) = session.stop_reason() {
                self.events.autopilot(AutopilotEvent::Stopped {
                    reason,
                    attempts: session.attempt(),
                    best_score: session.best_score(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::SeedableRng;
    use zr_core::Metrics;

    use super::*;
    use crate::testing::{ScriptedApi, progress, sample_asset};

    fn controller(api: Arc<ScriptedApi>) -> Controller<Arc<ScriptedApi>, StdRng> {
        let config = ClientConfig {
            job_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        Controller::with_optimizer(
            api,
            config,
            Optimizer::with_rng(MutationPolicy::default(), StdRng::seed_from_u64(11)),
        )
    }

    fn scenario_params() -> ParameterSet {
        ParameterSet {
            depth: 0.75,
            pose: 0.40,
            strength: 0.70,
            seed: 42,
            ..Default::default()
        }
        .with_character("Goku")
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_run_records_one_candidate() {
        let api = Arc::new(ScriptedApi::new().job_succeeds(Metrics::new(0.95, 0.93, 14.0)));
        let mut ctl = controller(api.clone());

        let report = ctl
            .generate(&sample_asset(), scenario_params(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.candidates.len(), 1);
        assert!(report.session_id.is_none());
        assert_eq!(ctl.store().len(), 1);
        assert!(ctl.session().is_none());
        assert!(!ctl.is_busy());
        assert_eq!(api.submit_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autopilot_resubmits_mutated_params_until_target() {
        let api = Arc::new(
            ScriptedApi::new()
                .job_succeeds(Metrics::new(0.60, 0.80, 10.0))
                .job_succeeds(Metrics::new(0.85, 0.92, 10.0))
                .job_succeeds(Metrics::new(0.95, 0.95, 10.0)),
        );
        let mut ctl = controller(api.clone());

        let report = ctl
            .generate(
                &sample_asset(),
                scenario_params(),
                Some(AutopilotConfig {
                    target_threshold: 0.92,
                    max_attempts: 5,
                }),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.stop_reason, Some(StopReason::TargetReached));
        assert_eq!(report.candidates.len(), 3);
        assert_eq!(report.best.as_ref().unwrap().job_id(), "task-3");

        let submitted = api.submitted();
        let first = submitted[0].parameter_set().unwrap();
        let second = submitted[1].parameter_set().unwrap();
        assert_eq!(first.seed, 42);
        assert!((second.depth - 0.78).abs() < 1e-9);
        assert!((second.strength - 0.68).abs() < 1e-9);
        assert_eq!(second.character_name, "Goku");

        let session = ctl.session().unwrap();
        assert!(!session.is_active());
        assert_eq!(session.attempt(), 3);
        assert_eq!(session.candidates(), &["task-1", "task-2", "task-3"]);
        assert!(!ctl.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_autopilot_stops_on_budget() {
        let mut api = ScriptedApi::new();
        for _ in 0..3 {
            api = api.job_succeeds(Metrics::new(0.80, 0.80, 1.0));
        }
        let api = Arc::new(api);
        let mut ctl = controller(api.clone());

        let report = ctl
            .generate(
                &sample_asset(),
                scenario_params(),
                Some(AutopilotConfig {
                    target_threshold: 0.92,
                    max_attempts: 3,
                }),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.stop_reason, Some(StopReason::BudgetExhausted));
        assert_eq!(api.submit_calls(), 3);
        assert_eq!(ctl.session().unwrap().attempt(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_failure_deactivates_session() {
        let api = Arc::new(
            ScriptedApi::new()
                .job_succeeds(Metrics::new(0.5, 0.5, 1.0))
                .then_status(progress(30.0, "SYNTHESIZING_IMAGE"))
                .job_fails(),
        );
        let mut ctl = controller(api.clone());

        let err = ctl
            .generate(
                &sample_asset(),
                scenario_params(),
                Some(AutopilotConfig::default()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::EngineFailure { .. }));
        let session = ctl.session().unwrap();
        assert!(!session.is_active());
        assert_eq!(session.stop_reason(), Some(StopReason::EngineFailure));
        assert_eq!(api.result_calls(), 1);
        assert_eq!(ctl.store().len(), 1);
        assert!(!ctl.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_is_a_hard_stop() {
        let api = Arc::new(ScriptedApi::new().with_submit_error(|| ClientError::Busy));
        let mut ctl = controller(api.clone());

        let err = ctl
            .generate(
                &sample_asset(),
                scenario_params(),
                Some(AutopilotConfig::default()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Busy));
        assert_eq!(api.submit_calls(), 1);
        assert_eq!(ctl.session().unwrap().stop_reason(), Some(StopReason::Busy));
        assert!(!ctl.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_while_in_flight_is_rejected_without_network() {
        let api = Arc::new(ScriptedApi::new());
        let ctl = controller(api.clone());

        let _handle = ctl
            .submit(&sample_asset(), JobParams::Transform(scenario_params()))
            .await
            .unwrap();
        let calls_before = api.network_calls();

        let err = ctl
            .submit(&sample_asset(), JobParams::Transform(scenario_params()))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Precondition(_)));
        assert_eq!(api.network_calls(), calls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_autopilot_run_resets_session() {
        let api = Arc::new(
            ScriptedApi::new()
                .job_succeeds(Metrics::new(0.99, 0.99, 1.0))
                .job_succeeds(Metrics::new(0.40, 0.40, 1.0)),
        );
        let mut ctl = controller(api.clone());
        let cancel = CancellationToken::new();

        ctl.generate(&sample_asset(), scenario_params(), Some(AutopilotConfig::default()), &cancel)
            .await
            .unwrap();
        let first_id = ctl.session().unwrap().id();
        assert_eq!(ctl.session().unwrap().best_score(), 0.99);

        let budget = AutopilotConfig {
            target_threshold: 0.92,
            max_attempts: 1,
        };
        ctl.generate(&sample_asset(), scenario_params(), Some(budget), &cancel)
            .await
            .unwrap();
        let session = ctl.session().unwrap();
        assert_ne!(session.id(), first_id);
        assert_eq!(session.best_score(), 0.40);
        assert_eq!(session.candidates(), &["task-2"]);
        assert_eq!(ctl.store().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_emitted_in_order() {
        let api = Arc::new(
            ScriptedApi::new()
                .then_status(progress(20.0, "INITIALIZING"))
                .then_status(progress(60.0, "SYNTHESIZING_IMAGE"))
                .job_succeeds(Metrics::new(0.9, 0.9, 1.0)),
        );
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut ctl = controller(api).with_events(tx);

        ctl.generate(&sample_asset(), scenario_params(), None, &CancellationToken::new())
            .await
            .unwrap();

        let mut percents = Vec::new();
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                ZrEvent::Job(JobEvent::Progress(p)) => percents.push(p.percent),
                ZrEvent::Job(JobEvent::Completed { .. }) => completed = true,
                _ => {}
            }
        }
        assert_eq!(percents, vec![20, 60]);
        assert!(completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_resubmit_pause_stops_session() {
        let api = Arc::new(
            ScriptedApi::new()
                .job_succeeds(Metrics::new(0.50, 0.50, 1.0))
                .job_succeeds(Metrics::new(0.99, 0.99, 1.0)),
        );
        let mut ctl = controller(api.clone());
        let cancel = CancellationToken::new();

        // the first job finishes at once, the resubmit pause is at least 600ms
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let err = ctl
            .generate(&sample_asset(), scenario_params(), Some(AutopilotConfig::default()), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Cancelled { ref job_id } if job_id == "task-1"));
        let session = ctl.session().unwrap();
        assert!(!session.is_active());
        assert_eq!(session.stop_reason(), Some(StopReason::Cancelled));
        assert_eq!(session.attempt(), 1);
        assert_eq!(api.submit_calls(), 1);
        assert!(!ctl.is_busy());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.submit_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_generate_future_stops_session() {
        // status never terminal, the job runs until the future is dropped
        let api = Arc::new(ScriptedApi::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut ctl = controller(api.clone()).with_events(tx);

        let asset = sample_asset();
        let cancel = CancellationToken::new();
        let run = ctl.generate(
            &asset,
            scenario_params(),
            Some(AutopilotConfig::default()),
            &cancel,
        );
        assert!(tokio::time::timeout(Duration::from_secs(5), run).await.is_err());

        let session = ctl.session().unwrap();
        assert!(!session.is_active());
        assert_eq!(session.stop_reason(), Some(StopReason::Cancelled));
        assert!(!ctl.is_busy());

        let mut stopped = None;
        while let Ok(event) = rx.try_recv() {
            if let ZrEvent::Autopilot(AutopilotEvent::Stopped { reason, .. }) = event {
                stopped = Some(reason);
            }
        }
        assert_eq!(stopped, Some(StopReason::Cancelled));
    }

    #[tokio::test]
    async fn test_analyze_overlays_recommendations() {
        let api = Arc::new(ScriptedApi::new());
        let ctl = controller(api);

        let (report, params) = ctl.analyze(&sample_asset(), &scenario_params()).await.unwrap();
        assert_eq!(report.detected_essence, "test_subject");
        assert_eq!(params.steps, 40);
        assert_eq!(params.depth, 0.9);
        assert_eq!(params.feature_prompt, "film grain");
        assert_eq!(params.character_name, "Goku");
    }

    #[tokio::test(start_paused = true)]
    async fn test_animate_records_video_candidate() {
        let api = Arc::new(ScriptedApi::new().job_succeeds(Metrics::new(0.0, 0.0, 80.0)));
        let mut ctl = controller(api.clone());

        let candidate = ctl
            .animate(&sample_asset(), AnimationParams::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(candidate.params(), JobParams::Animate(_)));
        assert!(ctl.session().is_none());
        assert_eq!(ctl.store().get(candidate.job_id()).unwrap(), &candidate);
    }
}
