use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;
use zr_core::{Metrics, ParameterSet, Pipeline, Progress};

use crate::optimizer::StopReason;

#[derive(Debug, Clone)]
pub enum ZrEvent {
    Job(JobEvent),
    Autopilot(AutopilotEvent),
}

#[derive(Debug, Clone)]
pub enum JobEvent {
    Submitted {
        job_id: String,
        pipeline: Pipeline,
    },
    Progress(Progress),
    Completed {
        job_id: String,
        metrics: Metrics,
    },
    Failed {
        job_id: Option<String>,
        error: String,
    },
}

#[derive(Debug, Clone)]
pub enum AutopilotEvent {
    Started {
        session_id: Uuid,
        target_threshold: f64,
        max_attempts: u32,
    },
    Mutated {
        attempt: u32,
        next: ParameterSet,
    },
    Stopped {
        reason: StopReason,
        attempts: u32,
        best_score: f64,
    },
}

/// Optional fan-out of controller events; a closed receiver is ignored.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<UnboundedSender<ZrEvent>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<ZrEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn job(&self, event: JobEvent) {
        self.send(ZrEvent::Job(event));
    }

    pub fn autopilot(&self, event: AutopilotEvent) {
        self.send(ZrEvent::Autopilot(event));
    }

    fn send(&self, event: ZrEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
