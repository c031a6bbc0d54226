//! HTTP client for a running mediagen server.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::error::GenerationError;
use crate::job::JobStatus;
use crate::media::MediaType;
use crate::poller::StatusSource;
use crate::web::schemas::{StatusResponse, SubmitBody, SubmitResponse};

/// Talks to the `/api` routes of a mediagen server.
#[derive(Debug, Clone)]
pub struct GeneratorClient {
    http: Client,
    base: Url,
}

impl GeneratorClient {
    /// `base` is the server root, eg `http://127.0.0.1:3000/`.
    pub fn new(base: Url) -> Self {
        Self {
            http: Client::new(),
            base,
        }
    }

    /// Submits a prompt. The response carries either the finished media or a job id.
    pub async fn submit(
        &self,
        media_type: MediaType,
        prompt: &str,
        source_image: Option<String>,
    ) -> Result<SubmitResponse, GenerationError> {
        let path = match media_type {
            MediaType::Image => "/api/generate",
            MediaType::Video => "/api/generate/video",
        };
        let body = SubmitBody {
            prompt: Some(prompt.to_string()),
            source_image,
        };
        let resp = self
            .http
            .post(self.base.join(path)?)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let parsed: SubmitResponse = resp.json().await?;
        if parsed.success {
            return Ok(parsed);
        }
        let message = parsed.error.unwrap_or_else(|| status.to_string());
        Err(if status == StatusCode::BAD_REQUEST {
            GenerationError::InvalidRequest(message)
        } else {
            GenerationError::GenerationFailed(message)
        })
    }
}

#[async_trait]
impl StatusSource for GeneratorClient {
    async fn status(&self, job_id: &str) -> Result<JobStatus, GenerationError> {
        let mut url = self.base.join("/api/status/")?;
        url.path_segments_mut()
            .map_err(|_| GenerationError::Internal(format!("{} can't be a base", self.base)))?
            .pop_if_empty()
            .push(job_id);

        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        debug!("Status poll for {job_id}: {status}");
        if status == StatusCode::NOT_FOUND {
            return Err(GenerationError::JobNotFound(job_id.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::ProviderUnavailable(format!("{status}: {body}")));
        }
        Ok(resp.json::<StatusResponse>().await?.into())
    }
}
