use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};
use url::Url;

use super::{Prediction, PredictionWire, Provider};
use crate::collector::{ByteStream, ChunkError};
use crate::config::GeneratorConfig;
use crate::constants::{
    GENERIC_FAILURE_MESSAGE, PROVIDER_MAX_POLLS, PROVIDER_POLL_INTERVAL, PROVIDER_WAIT_SECONDS,
};
use crate::error::GenerationError;
use crate::job::JobState;
use crate::normalize::ProviderOutput;

/// Replicate's HTTP prediction API.
#[derive(Clone)]
pub struct ReplicateProvider {
    client: Client,
    api_token: String,
    base: Url,
    file_output: bool,
    max_polls: u32,
}

impl std::fmt::Debug for ReplicateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicateProvider")
            .field("base", &self.base.as_str())
            .field("file_output", &self.file_output)
            .field("max_polls", &self.max_polls)
            .finish_non_exhaustive()
    }
}

impl ReplicateProvider {
    /// Builds a client from the startup configuration.
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            client: Client::new(),
            api_token: config.api_token().to_string(),
            base: config.provider_base.clone(),
            file_output: config.file_output,
            max_polls: PROVIDER_MAX_POLLS,
        }
    }

    /// Caps how many status checks [Provider::run] makes before giving up.
    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    fn model_predictions_url(&self, model: &str) -> Result<Url, GenerationError> {
        Ok(self.base.join(&format!("models/{model}/predictions"))?)
    }

    fn prediction_url(&self, id: &str) -> Result<Url, GenerationError> {
        let mut url = self.base.join("predictions/")?;
        url.path_segments_mut()
            .map_err(|_| GenerationError::Internal(format!("{} can't be a base", self.base)))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    async fn post_prediction(
        &self,
        model: &str,
        body: Value,
        wait: bool,
    ) -> Result<PredictionWire, GenerationError> {
        let mut request = self
            .client
            .post(self.model_predictions_url(model)?)
            .bearer_auth(&self.api_token)
            .json(&body);
        if wait {
            request = request.header("Prefer", format!("wait={PROVIDER_WAIT_SECONDS}"));
        }
        let resp = request.send().await?;

        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(GenerationError::GenerationFailed(format!(
                "Prediction request error {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        serde_json::from_slice(&bytes).map_err(|err| {
            GenerationError::ProviderUnavailable(format!("Failed to parse prediction JSON: {err}"))
        })
    }

    async fn fetch_prediction(&self, id: &str) -> Result<PredictionWire, GenerationError> {
        let resp = self
            .client
            .get(self.prediction_url(id)?)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GenerationError::JobNotFound(id.to_string()));
        }
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(GenerationError::ProviderUnavailable(format!(
                "Prediction lookup error {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        serde_json::from_slice(&bytes).map_err(|err| {
            GenerationError::ProviderUnavailable(format!("Failed to parse prediction JSON: {err}"))
        })
    }

    /// With file output on, every URL is handed back as a lazy download instead.
    fn classify(&self, value: Value) -> ProviderOutput {
        match ProviderOutput::from_json(value) {
            ProviderOutput::Text(url) if self.file_output => {
                ProviderOutput::ByteStream(self.download(url))
            }
            ProviderOutput::Sequence(items) if self.file_output => ProviderOutput::Sequence(
                items
                    .into_iter()
                    .map(|item| match item {
                        ProviderOutput::Text(url) => ProviderOutput::ByteStream(self.download(url)),
                        other => other,
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    /// Nothing is fetched until the stream is first polled.
    fn download(&self, url: String) -> ByteStream {
        let client = self.client.clone();
        futures::stream::once(async move {
            client
                .get(url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
        })
        .map(|resp| match resp {
            Ok(resp) => resp
                .bytes_stream()
                .map(|chunk| chunk.map_err(ChunkError::from))
                .boxed(),
            Err(err) => futures::stream::once(async move { Err(ChunkError::from(err)) }).boxed(),
        })
        .flatten()
        .boxed()
    }
}

#[async_trait]
impl Provider for ReplicateProvider {
    #[instrument(level = "debug", skip(self, input))]
    async fn run(&self, model: &str, input: Value) -> Result<ProviderOutput, GenerationError> {
        let mut prediction = self
            .post_prediction(model, json!({ "input": input }), true)
            .await?;
        info!("Prediction {} is {}", prediction.id, prediction.status);

        // Prefer: wait gives up after a while, keep going until the provider is done.
        let mut polls = 0;
        while !JobState::from_provider(&prediction.status).is_terminal() {
            if polls >= self.max_polls {
                error!("Prediction {} still {} after {polls} checks", prediction.id, prediction.status);
                return Err(GenerationError::GenerationTimedOut { polls });
            }
            sleep(PROVIDER_POLL_INTERVAL).await;
            prediction = self.fetch_prediction(&prediction.id).await?;
            polls += 1;
            debug!("Prediction {} is {}", prediction.id, prediction.status);
        }

        match JobState::from_provider(&prediction.status) {
            JobState::Succeeded => Ok(self.classify(prediction.output)),
            _ => {
                let detail = prediction
                    .error_text()
                    .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string());
                error!("Prediction {} failed: {detail}", prediction.id);
                Err(GenerationError::GenerationFailed(detail))
            }
        }
    }

    #[instrument(level = "debug", skip(self, input))]
    async fn create_prediction(
        &self,
        model: &str,
        input: Value,
        webhook: Option<&Url>,
    ) -> Result<Prediction, GenerationError> {
        let body = match webhook {
            Some(webhook) => json!({
                "input": input,
                "webhook": webhook.as_str(),
                "webhook_events_filter": ["completed"],
            }),
            None => json!({ "input": input }),
        };
        let wire = self.post_prediction(model, body, false).await?;
        info!("Created prediction {} ({})", wire.id, wire.status);
        Ok(self.to_prediction(wire))
    }

    #[instrument(level = "debug", skip(self))]
    async fn get_prediction(&self, id: &str) -> Result<Prediction, GenerationError> {
        let wire = self.fetch_prediction(id).await?;
        Ok(self.to_prediction(wire))
    }

    fn to_prediction(&self, wire: PredictionWire) -> Prediction {
        let error = wire.error_text();
        Prediction {
            id: wire.id,
            status: wire.status,
            model: wire.model,
            output: self.classify(wire.output),
            error,
        }
    }
}
