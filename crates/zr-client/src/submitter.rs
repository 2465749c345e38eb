use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};
use zr_core::JobParams;

use crate::api::{Asset, JobApi};
use crate::error::{ClientError, Result};
use crate::job::JobHandle;

/// At most one non-terminal job per controller.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the flight lock exactly once, on drop.
#[derive(Debug)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

pub struct Submitter<A> {
    api: A,
    flight: SingleFlight,
}

impl<A: JobApi> Submitter<A> {
    pub fn new(api: A, flight: SingleFlight) -> Self {
        Self { api, flight }
    }

    /// Sends one job. Local preconditions are checked before any network call.
    pub async fn submit(&self, asset: &Asset, params: JobParams) -> Result<JobHandle> {
        if asset.is_empty() {
            return Err(ClientError::Precondition("no source asset provided".into()));
        }
        let guard = self
            .flight
            .try_acquire()
            .ok_or_else(|| ClientError::Precondition("a job is already in flight".into()))?;

        // `guard` drops on every early return below
        match self.api.submit(asset, &params).await {
            Ok(job_id) => {
                info!("{} job {} submitted", params.pipeline().name(), job_id);
                Ok(JobHandle::new(job_id, params, guard))
            }
            Err(ClientError::Busy) => {
                warn!("Engine busy, submission rejected");
                Err(ClientError::Busy)
            }
            Err(err) => {
                warn!("Submission failed: {}", err);
                Err(err)
            }
        }
    }
}
