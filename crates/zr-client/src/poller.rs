use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zr_core::{Artifact, Phase, Progress, decode_b64};

use crate::api::JobApi;
use crate::api::schemas::{ProgressPayload, RemoteState, ResultFetch};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::job::{FailureReason, JobHandle, JobResult, JobState, Outcome};

const FAR_FUTURE_SECS: u64 = 30 * 365 * 24 * 3600;

/// Why a wait ended before its future resolved.
enum Interrupt {
    Cancelled,
    Deadline,
}

/// Drives one `JobHandle` to its terminal `Outcome`.
///
/// One request is outstanding at a time: the next poll is scheduled only
/// after the previous one has returned. Every request and every pause is
/// raced against the cancellation token and the job deadline.
pub struct Poller<A> {
    api: A,
    config: ClientConfig,
}

impl<A: JobApi> Poller<A> {
    pub fn new(api: A, config: ClientConfig) -> Self {
        Self { api, config }
    }

    pub async fn drive<F>(&self, handle: &mut JobHandle, cancel: &CancellationToken, mut on_progress: F) -> Outcome
    where
        F: FnMut(&Progress),
    {
        let job_id = handle.job_id().to_string();
        let deadline = deadline_after(handle.submitted_at(), self.config.job_timeout);

        let outcome = match self.poll_until_terminal(handle, cancel, deadline, &mut on_progress).await {
            Ok(()) => self.fetch_result(&job_id, cancel, deadline).await,
            Err(reason) => Outcome::Failure {
                job_id: job_id.clone(),
                reason,
            },
        };

        match &outcome {
            Outcome::Success(_) => {
                info!("Job {} finished after {:.1?}", job_id, handle.elapsed());
                handle.finish(JobState::Success);
            }
            Outcome::Failure { reason, .. } => {
                warn!("Job {} ended without result: {:?}", job_id, reason);
                handle.finish(JobState::Failure);
            }
        }
        outcome
    }

    async fn poll_until_terminal<F>(
        &self,
        handle: &mut JobHandle,
        cancel: &CancellationToken,
        deadline: Instant,
        on_progress: &mut F,
    ) -> std::result::Result<(), FailureReason>
    where
        F: FnMut(&Progress),
    {
        let job_id = handle.job_id().to_string();
        let mut consecutive_errors = 0u32;
        let mut last_phase: Option<Phase> = None;

        loop {
            let polled = self
                .guarded(self.api.status(&job_id), cancel, deadline)
                .await
                .map_err(|i| self.failure(i))?;

            match polled {
                Ok(response) => {
                    consecutive_errors = 0;
                    handle.mark_polling();
                    match response.state() {
                        RemoteState::Success => return Ok(()),
                        RemoteState::Failure => return Err(FailureReason::Engine),
                        RemoteState::Running => {
                            if let Some(payload) = response.progress {
                                let progress = decode_progress(&job_id, payload, handle.elapsed());
                                if last_phase.as_ref() != Some(&progress.phase) {
                                    info!("Job {}: {} ({}%)", job_id, progress.phase.label(), progress.percent);
                                    last_phase = Some(progress.phase.clone());
                                }
                                handle.observe(&progress);
                                on_progress(&progress);
                            }
                        }
                    }
                }
                Err(err) if !err.is_transient() => {
                    return Err(FailureReason::Unreachable(err.to_string()));
                }
                Err(err) => {
                    consecutive_errors += 1;
                    debug!("Poll {} for job {} failed: {}", consecutive_errors, job_id, err);
                    if consecutive_errors >= self.config.max_poll_errors {
                        return Err(FailureReason::Unreachable(format!(
                            "{consecutive_errors} consecutive poll failures, last: {err}"
                        )));
                    }
                }
            }

            self.pause(self.config.poll_interval, cancel, deadline)
                .await
                .map_err(|i| self.failure(i))?;
        }
    }

    async fn fetch_result(&self, job_id: &str, cancel: &CancellationToken, deadline: Instant) -> Outcome {
        let failed = |reason| Outcome::Failure {
            job_id: job_id.to_string(),
            reason,
        };

        loop {
            let fetched = match self.guarded(self.api.result(job_id), cancel, deadline).await {
                Ok(fetched) => fetched,
                Err(i) => return failed(self.failure(i)),
            };

            match fetched {
                Ok(ResultFetch::Ready(payload)) => {
                    let artifact = Artifact::from_b64(
                        payload.result_image_b64.as_deref(),
                        payload.video_b64.as_deref(),
                    );
                    return match artifact {
                        Ok(artifact) => Outcome::Success(JobResult {
                            job_id: job_id.to_string(),
                            artifact,
                            metrics: payload.metrics,
                        }),
                        Err(err) => failed(FailureReason::Malformed(err.to_string())),
                    };
                }
                Ok(ResultFetch::Pending) => {
                    debug!("Result for job {} not materialized yet", job_id);
                    if let Err(i) = self.pause(self.config.result_retry, cancel, deadline).await {
                        return failed(self.failure(i));
                    }
                }
                Err(ClientError::Decode(msg)) => return failed(FailureReason::Malformed(msg)),
                Err(err) => return failed(FailureReason::Unreachable(err.to_string())),
            }
        }
    }

    /// Runs `fut` unless cancellation or the deadline comes first. A cancelled
    /// request future is dropped before it is ever polled.
    async fn guarded<T>(
        &self,
        fut: impl Future<Output = Result<T>>,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> std::result::Result<Result<T>, Interrupt> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupt::Cancelled),
            _ = sleep_until(deadline) => Err(Interrupt::Deadline),
            res = fut => Ok(res),
        }
    }

    async fn pause(
        &self,
        delay: Duration,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> std::result::Result<(), Interrupt> {
        let wake = deadline_after(Instant::now(), delay).min(deadline);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupt::Cancelled),
            _ = sleep_until(wake) => {
                if Instant::now() >= deadline {
                    Err(Interrupt::Deadline)
                } else {
                    Ok(())
                }
            }
        }
    }

    fn failure(&self, interrupt: Interrupt) -> FailureReason {
        match interrupt {
            Interrupt::Cancelled => FailureReason::Cancelled,
            Interrupt::Deadline => FailureReason::Timeout(self.config.job_timeout),
        }
    }
}

/// `start + span`, or a deadline decades out when that overflows.
fn deadline_after(start: Instant, span: Duration) -> Instant {
    start
        .checked_add(span)
        .unwrap_or_else(|| start + Duration::from_secs(FAR_FUTURE_SECS))
}

fn decode_progress(job_id: &str, payload: ProgressPayload, elapsed: Duration) -> Progress {
    let percent = payload.percent.clamp(0.0, 100.0).round() as u8;
    let code = payload.status_text.unwrap_or_default();

    let preview = payload.preview_b64.and_then(|b64| match decode_b64(&b64) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            debug!("Dropping undecodable preview for job {}: {}", job_id, err);
            None
        }
    });

    Progress::new(job_id, percent, code, elapsed).with_preview(preview)
}
