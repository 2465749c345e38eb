mod http;
pub mod schemas;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use zr_core::{AnalysisReport, JobParams};

use crate::error::Result;
use crate::api::schemas::{HealthResponse, ResultFetch, StatusResponse};

pub use http::HttpJobApi;

/// Binary source image sent along with every job.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Asset {
    pub fn new(file_name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    /// Reads a file and sniffs its image type from the content.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let mime = image::guess_format(&bytes)
            .map(|format| format.to_mime_type())
            .unwrap_or("application/octet-stream");
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());
        Ok(Self::new(file_name, mime, bytes))
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Request/response contract of the remote synthesis service.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Dispatches a job and returns the server-issued task id.
    async fn submit(&self, asset: &Asset, params: &JobParams) -> Result<String>;

    async fn status(&self, job_id: &str) -> Result<StatusResponse>;

    async fn result(&self, job_id: &str) -> Result<ResultFetch>;

    async fn analyze(&self, asset: &Asset, character_name: &str) -> Result<AnalysisReport>;

    async fn health(&self) -> Result<HealthResponse>;

    /// Force-releases the server-side hardware mutex.
    async fn unlock(&self) -> Result<String>;
}

#[async_trait]
impl<T: JobApi + ?Sized> JobApi for Arc<T> {
    async fn submit(&self, asset: &Asset, params: &JobParams) -> Result<String> {
        (**self).submit(asset, params).await
    }

    async fn status(&self, job_id: &str) -> Result<StatusResponse> {
        (**self).status(job_id).await
    }

    async fn result(&self, job_id: &str) -> Result<ResultFetch> {
        (**self).result(job_id).await
    }

    async fn analyze(&self, asset: &Asset, character_name: &str) -> Result<AnalysisReport> {
        (**self).analyze(asset, character_name).await
    }

    async fn health(&self) -> Result<HealthResponse> {
        (**self).health().await
    }

    async fn unlock(&self) -> Result<String> {
        (**self).unlock().await
    }
}
