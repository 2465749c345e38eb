use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use zr_core::{AnalysisReport, JobParams};

use crate::api::schemas::{
    HealthResponse, ResultFetch, ResultPayload, StatusResponse, SubmitResponse, UnlockResponse,
};
use crate::api::{Asset, JobApi};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// `JobApi` over HTTP: multipart for submissions, JSON for everything else.
#[derive(Debug, Clone)]
pub struct HttpJobApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJobApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("zrealism/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn asset_part(asset: &Asset) -> Result<Part> {
        Part::bytes(asset.bytes.clone())
            .file_name(asset.file_name.clone())
            .mime_str(&asset.mime)
            .map_err(ClientError::from)
    }
}

/// Maps a non-success response to the error taxonomy.
async fn reject(response: Response) -> ClientError {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ClientError::Busy;
    }
    let body = response.text().await.unwrap_or_default();
    ClientError::Http {
        status: status.as_u16(),
        body,
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(ClientError::from)
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn submit(&self, asset: &Asset, params: &JobParams) -> Result<String> {
        let form = params
            .form_fields()
            .into_iter()
            .fold(Form::new().part("file", Self::asset_part(asset)?), |form, (k, v)| {
                form.text(k, v)
            });

        let response = self
            .client
            .post(self.url(params.pipeline().endpoint()))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(reject(response).await);
        }

        let body: SubmitResponse = decode(response).await?;
        debug!("Server accepted job {} ({:?})", body.task_id, body.status);
        Ok(body.task_id)
    }

    async fn status(&self, job_id: &str) -> Result<StatusResponse> {
        let response = self.client.get(self.url(&format!("/status/{job_id}"))).send().await?;
        if !response.status().is_success() {
            return Err(reject(response).await);
        }
        decode(response).await
    }

    async fn result(&self, job_id: &str) -> Result<ResultFetch> {
        let response = self.client.get(self.url(&format!("/result/{job_id}"))).send().await?;
        if response.status() == StatusCode::ACCEPTED {
            return Ok(ResultFetch::Pending);
        }
        if !response.status().is_success() {
            return Err(reject(response).await);
        }
        let payload: ResultPayload = decode(response).await?;
        Ok(ResultFetch::Ready(payload))
    }

    async fn analyze(&self, asset: &Asset, character_name: &str) -> Result<AnalysisReport> {
        let form = Form::new()
            .part("file", Self::asset_part(asset)?)
            .text("character_name", character_name.to_string());

        let response = self.client.post(self.url("/analyze")).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(reject(response).await);
        }
        decode(response).await
    }

    async fn health(&self) -> Result<HealthResponse> {
        let response = self.client.get(self.url("/health")).send().await?;
        if !response.status().is_success() {
            return Err(reject(response).await);
        }
        decode(response).await
    }

    async fn unlock(&self) -> Result<String> {
        let response = self.client.post(self.url("/system/unlock")).send().await?;
        if !response.status().is_success() {
            return Err(reject(response).await);
        }
        let body: UnlockResponse = decode(response).await?;
        Ok(body.message)
    }
}
