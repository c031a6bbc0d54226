//! The generative-media provider, seen as a black-box job runner.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::GenerationError;
use crate::media::MediaType;
use crate::normalize::ProviderOutput;

mod replicate;

pub use replicate::ReplicateProvider;

/// A prediction as the provider reports it.
#[derive(Debug)]
pub struct Prediction {
    /// Provider job id
    pub id: String,
    /// Provider status word, e.g. `processing`
    pub status: String,
    /// Which model ran it, when the provider says
    pub model: Option<String>,
    /// Whatever the model produced, classified
    pub output: ProviderOutput,
    /// Failure detail
    pub error: Option<String>,
}

impl Prediction {
    /// The media type the prediction's model produces, if it's one of ours.
    pub fn media_type(&self) -> Option<MediaType> {
        self.model.as_deref().and_then(MediaType::from_model)
    }
}

/// Prediction JSON as sent by the provider, from its API or its webhooks.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionWire {
    /// Job id, webhooks relayed by other hosts call it `jobId`
    #[serde(alias = "jobId")]
    pub id: String,
    /// Provider status word
    pub status: String,
    /// Which model ran it
    #[serde(default)]
    pub model: Option<String>,
    /// Raw output
    #[serde(default)]
    pub output: Value,
    /// String or structured error
    #[serde(default)]
    pub error: Option<Value>,
}

impl PredictionWire {
    fn error_text(&self) -> Option<String> {
        match &self.error {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) if text.trim().is_empty() => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// Start, run and inspect predictions.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Runs a prediction to completion and returns its output. Single attempt.
    async fn run(&self, model: &str, input: serde_json::Value) -> Result<ProviderOutput, GenerationError>;

    /// Starts a prediction without waiting for it. The provider calls `webhook` once it
    /// completes, when one is given.
    async fn create_prediction(
        &self,
        model: &str,
        input: serde_json::Value,
        webhook: Option<&Url>,
    ) -> Result<Prediction, GenerationError>;

    /// Current state of a prediction. Unknown ids are [GenerationError::JobNotFound].
    async fn get_prediction(&self, id: &str) -> Result<Prediction, GenerationError>;

    /// Classifies a prediction's JSON, from the API or from a webhook.
    fn to_prediction(&self, wire: PredictionWire) -> Prediction {
        let error = wire.error_text();
        Prediction {
            id: wire.id,
            status: wire.status,
            model: wire.model,
            output: ProviderOutput::from_json(wire.output),
            error,
        }
    }
}
