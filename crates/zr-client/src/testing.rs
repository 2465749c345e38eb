//! Scripted in-memory `JobApi` for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use zr_core::{AnalysisReport, JobParams, Metrics, Recommendations};

use crate::api::schemas::{
    HealthResponse, ProgressPayload, ResultFetch, ResultPayload, StatusResponse,
};
use crate::api::{Asset, JobApi};
use crate::error::{ClientError, Result};

pub(crate) fn sample_asset() -> Asset {
    Asset::new("goku.png", "image/png", vec![0x89, b'P', b'N', b'G'])
}

pub(crate) fn status(state: &str) -> StatusResponse {
    StatusResponse {
        status: state.to_string(),
        progress: None,
    }
}

pub(crate) fn progress(percent: f64, code: &str) -> StatusResponse {
    StatusResponse {
        status: "PROGRESS".to_string(),
        progress: Some(ProgressPayload {
            percent,
            status_text: Some(code.to_string()),
            preview_b64: None,
        }),
    }
}

pub(crate) fn ready(metrics: Metrics) -> ResultFetch {
    ResultFetch::Ready(ResultPayload {
        result_image_b64: Some(STANDARD.encode(b"png-bytes")),
        video_b64: None,
        metrics,
    })
}

type ErrorFactory = Box<dyn Fn() -> ClientError + Send + Sync>;

/// Answers are consumed in order across jobs. An empty status queue answers
/// a non-terminal `PROGRESS`; an empty result queue answers `202`.
#[derive(Default)]
pub(crate) struct ScriptedApi {
    submit_error: Option<ErrorFactory>,
    statuses: Mutex<VecDeque<Result<StatusResponse>>>,
    results: Mutex<VecDeque<Result<ResultFetch>>>,
    submitted: Mutex<Vec<JobParams>>,
    submit_calls: AtomicUsize,
    status_calls: AtomicUsize,
    result_calls: AtomicUsize,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_submit_error(mut self, factory: impl Fn() -> ClientError + Send + Sync + 'static) -> Self {
        self.submit_error = Some(Box::new(factory));
        self
    }

    pub fn then_status(self, response: StatusResponse) -> Self {
        self.statuses.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn then_status_error(self, err: ClientError) -> Self {
        self.statuses.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn then_result(self, fetch: ResultFetch) -> Self {
        self.results.lock().unwrap().push_back(Ok(fetch));
        self
    }

    pub fn then_result_error(self, err: ClientError) -> Self {
        self.results.lock().unwrap().push_back(Err(err));
        self
    }

    /// One poll answering `SUCCESS`, then a ready result with `metrics`.
    pub fn job_succeeds(self, metrics: Metrics) -> Self {
        self.then_status(status("SUCCESS")).then_result(ready(metrics))
    }

    pub fn job_fails(self) -> Self {
        self.then_status(status("FAILURE"))
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn result_calls(&self) -> usize {
        self.result_calls.load(Ordering::SeqCst)
    }

    pub fn network_calls(&self) -> usize {
        self.submit_calls() + self.status_calls() + self.result_calls()
    }

    pub fn submitted(&self) -> Vec<JobParams> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobApi for ScriptedApi {
    async fn submit(&self, _asset: &Asset, params: &JobParams) -> Result<String> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(factory) = &self.submit_error {
            return Err(factory());
        }
        self.submitted.lock().unwrap().push(params.clone());
        Ok(format!("task-{n}"))
    }

    async fn status(&self, _job_id: &str) -> Result<StatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(progress(50.0, "SYNTHESIZING_IMAGE")))
    }

    async fn result(&self, _job_id: &str) -> Result<ResultFetch> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ResultFetch::Pending))
    }

    async fn analyze(&self, _asset: &Asset, _character_name: &str) -> Result<AnalysisReport> {
        Ok(AnalysisReport {
            status: "success".into(),
            detected_essence: "test_subject".into(),
            recommendations: Recommendations {
                steps: 40,
                cfg_scale: 6.5,
                cn_scale_depth: 0.9,
                cn_scale_pose: 0.35,
                strength: 0.6,
                canny_low: None,
                canny_high: None,
                texture_prompt: Some("film grain".into()),
                negative_prompt: None,
            },
        })
    }

    async fn health(&self) -> Result<HealthResponse> {
        Ok(HealthResponse {
            hardware: "cpu".into(),
            extra: Default::default(),
        })
    }

    async fn unlock(&self) -> Result<String> {
        Ok("Hardware Mutex Released.".into())
    }
}
