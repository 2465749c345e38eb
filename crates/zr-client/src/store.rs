use std::collections::HashMap;

use tracing::info;
use zr_core::{Candidate, JobParams};

use crate::error::{ClientError, Result};
use crate::job::JobResult;

/// Append-only, in-memory history of finished jobs for one controller.
#[derive(Debug, Default)]
pub struct CandidateStore {
    // insertion order == completion order
    entries: Vec<Candidate>,
    index: HashMap<String, usize>,
}

impl CandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Archives a successful job together with the parameters it ran with.
    pub fn record(&mut self, result: JobResult, params: JobParams) -> Result<Candidate> {
        if self.index.contains_key(&result.job_id) {
            return Err(ClientError::DuplicateCandidate(result.job_id));
        }

        let candidate = Candidate::new(result.job_id, result.artifact, result.metrics, params);
        info!(
            "Recorded candidate {} (fitness {:.3})",
            candidate.job_id(),
            candidate.fitness()
        );

        self.index.insert(candidate.job_id().to_string(), self.entries.len());
        self.entries.push(candidate.clone());
        Ok(candidate)
    }

    /// Most recent first.
    pub fn list(&self) -> Vec<&Candidate> {
        self.entries.iter().rev().collect()
    }

    pub fn get(&self, job_id: &str) -> Result<&Candidate> {
        self.index
            .get(job_id)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| ClientError::NotFound(job_id.to_string()))
    }

    /// Highest fitness among `job_ids`, ties resolved toward the earliest.
    pub fn best_of<'a>(&self, job_ids: impl IntoIterator<Item = &'a str>) -> Option<&Candidate> {
        job_ids
            .into_iter()
            .filter_map(|id| self.get(id).ok())
            .fold(None, |best: Option<&Candidate>, c| match best {
                Some(b) if b.fitness() >= c.fitness() => Some(b),
                _ => Some(c),
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
