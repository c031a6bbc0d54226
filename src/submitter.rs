//! Starts remote predictions.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::GeneratorConfig;
use crate::error::GenerationError;
use crate::job::{GenerationRequest, Job, JobMode, JobState, JobStatus};
use crate::media::MediaResult;
use crate::normalize::Normalizer;
use crate::provider::Provider;
use crate::registry::{JobRegistry, callback_token};

/// What a submission produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Synchronous mode, the output is ready
    Completed(MediaResult),
    /// Asynchronous mode, poll the job (or wait for its webhook)
    Started {
        /// The job that was created
        job: Job,
        /// Always `starting`
        status: JobStatus,
    },
}

/// Submits generation requests to the provider in the configured mode.
#[derive(Clone)]
pub struct JobSubmitter {
    provider: Arc<dyn Provider>,
    config: Arc<GeneratorConfig>,
    registry: Arc<JobRegistry>,
}

impl JobSubmitter {
    /// A submitter over `provider`. Asynchronous jobs are recorded in `registry`.
    pub fn new(
        provider: Arc<dyn Provider>,
        config: Arc<GeneratorConfig>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            provider,
            config,
            registry,
        }
    }

    /// Validates, then runs (synchronous) or starts (asynchronous) the prediction.
    ///
    /// `request_host` is the Host the request came in on, used for the webhook address.
    pub async fn submit(
        &self,
        request: &GenerationRequest,
        request_host: Option<&str>,
    ) -> Result<Submission, GenerationError> {
        request.validate()?;

        let media_type = request.media_type();
        info!("Generating {:?} with prompt: {}", media_type, request.prompt());
        if let Some(image) = request.source_image() {
            info!(
                "Image data received: {}...",
                image.chars().take(50).collect::<String>()
            );
        }

        match self.config.mode {
            JobMode::Synchronous => {
                let output = self
                    .provider
                    .run(media_type.model(), request.provider_input())
                    .await
                    .map_err(|err| match err {
                        GenerationError::ProviderUnavailable(detail) => {
                            GenerationError::GenerationFailed(detail)
                        }
                        GenerationError::JobNotFound(id) => GenerationError::GenerationFailed(
                            format!("Prediction {id} disappeared while running"),
                        ),
                        other => other,
                    })?;
                info!("Generation complete: {:?}", output);
                let media = Normalizer::new(media_type, self.config.max_stream_bytes)
                    .normalize(output)
                    .await?;
                Ok(Submission::Completed(media))
            }
            JobMode::Asynchronous => {
                let token = callback_token();
                let webhook = self.config.callback_url(request_host)?.map(|mut url| {
                    url.query_pairs_mut().append_pair("token", &token);
                    url
                });
                if webhook.is_none() {
                    warn!("No host to derive a webhook address from, job will only be polled");
                }
                let prediction = self
                    .provider
                    .create_prediction(media_type.model(), request.provider_input(), webhook.as_ref())
                    .await?;
                info!("Started job {}", prediction.id);
                self.registry
                    .register(&prediction.id, media_type, token)
                    .await;
                Ok(Submission::Started {
                    job: Job::new(prediction.id, JobMode::Asynchronous),
                    status: JobStatus::pending(JobState::Starting),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::byte_stream_from_chunks;
    use crate::constants::TEST_HOST;
    use crate::media::MediaType;
    use crate::normalize::ProviderOutput;
    use crate::provider::testing::ScriptedProvider;
    use serde_json::json;

    fn submitter(provider: Arc<ScriptedProvider>, mode: JobMode) -> JobSubmitter {
        JobSubmitter::new(
            provider,
            Arc::new(GeneratorConfig::new("r8_test", mode)),
            Arc::new(JobRegistry::new()),
        )
    }

    fn image_request() -> GenerationRequest {
        GenerationRequest::new(MediaType::Image, "a lighthouse at dusk", None)
    }

    #[tokio::test]
    async fn sync_text_output() {
        let provider = Arc::new(ScriptedProvider::running(|| {
            ProviderOutput::from_json(json!("https://cdn.example/out.webp"))
        }));
        let result = submitter(provider, JobMode::Synchronous)
            .submit(&image_request(), Some(TEST_HOST))
            .await
            .unwrap();
        assert_eq!(
            result,
            Submission::Completed(MediaResult::url("https://cdn.example/out.webp"))
        );
    }

    #[tokio::test]
    async fn sync_array_output_matches_single_string() {
        let provider = Arc::new(ScriptedProvider::running(|| {
            ProviderOutput::from_json(json!(["https://cdn.example/out2.webp"]))
        }));
        let result = submitter(provider, JobMode::Synchronous)
            .submit(&image_request(), None)
            .await
            .unwrap();
        assert_eq!(
            result,
            Submission::Completed(MediaResult::url("https://cdn.example/out2.webp"))
        );
    }

    #[tokio::test]
    async fn sync_stream_output_is_inlined() {
        let provider = Arc::new(ScriptedProvider::running(|| {
            ProviderOutput::ByteStream(byte_stream_from_chunks(vec![
                vec![0x47, 0x49, 0x46],
                vec![0x38, 0x39, 0x61],
            ]))
        }));
        let result = submitter(provider, JobMode::Synchronous)
            .submit(&image_request(), None)
            .await
            .unwrap();
        let Submission::Completed(media) = result else {
            panic!("expected completed media");
        };
        assert_eq!(media.media_ref(), "data:image/webp;base64,R0lGODlh");
    }

    #[tokio::test]
    async fn sync_unrecognized_output_is_an_error() {
        let provider = Arc::new(ScriptedProvider::running(|| {
            ProviderOutput::from_json(json!({}))
        }));
        let err = submitter(provider, JobMode::Synchronous)
            .submit(&image_request(), None)
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::UnrecognizedOutputShape(json!({})));
    }

    #[tokio::test]
    async fn provider_failures_are_generation_failures() {
        let provider = Arc::new(ScriptedProvider::failing(
            GenerationError::ProviderUnavailable("connection refused".to_string()),
        ));
        let err = submitter(provider.clone(), JobMode::Synchronous)
            .submit(&image_request(), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GenerationError::GenerationFailed("connection refused".to_string())
        );
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn job_lost_while_running_is_a_generation_failure() {
        let provider = Arc::new(ScriptedProvider::failing(GenerationError::JobNotFound(
            "p1".to_string(),
        )));
        let err = submitter(provider, JobMode::Synchronous)
            .submit(&image_request(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::GenerationFailed(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn invalid_video_request_never_reaches_the_provider() {
        let provider = Arc::new(ScriptedProvider::default());
        for mode in [JobMode::Synchronous, JobMode::Asynchronous] {
            let request = GenerationRequest::new(MediaType::Video, "a cat", Some(String::new()));
            let err = submitter(provider.clone(), mode)
                .submit(&request, Some(TEST_HOST))
                .await
                .unwrap_err();
            assert!(matches!(err, GenerationError::InvalidRequest(_)));
        }
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn async_returns_a_starting_job_with_a_webhook() {
        let provider = Arc::new(ScriptedProvider::default());
        let result = submitter(provider.clone(), JobMode::Asynchronous)
            .submit(&image_request(), Some(TEST_HOST))
            .await
            .unwrap();
        let Submission::Started { job, status } = result else {
            panic!("expected a started job");
        };
        assert_eq!(job.id, "p1");
        assert_eq!(job.mode, JobMode::Asynchronous);
        assert_eq!(status, JobStatus::pending(JobState::Starting));

        let webhook = provider.webhooks.lock().unwrap()[0].clone().expect("webhook");
        assert_eq!(
            webhook.as_str().split('?').next(),
            Some("https://mediagen.example.org/api/webhook")
        );
        let token = webhook
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
            .expect("token");
        assert_eq!(token.len(), 32);
    }

    #[tokio::test]
    async fn async_jobs_are_registered_with_their_token() {
        let provider = Arc::new(ScriptedProvider::default());
        let registry = Arc::new(JobRegistry::new());
        let submitter = JobSubmitter::new(
            provider.clone(),
            Arc::new(GeneratorConfig::new("r8_test", JobMode::Asynchronous)),
            registry.clone(),
        );
        let request = GenerationRequest::new(
            MediaType::Video,
            "a cat",
            Some("data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAAB".to_string()),
        );
        submitter.submit(&request, Some(TEST_HOST)).await.unwrap();

        let webhook = provider.webhooks.lock().unwrap()[0].clone().expect("webhook");
        let token = webhook
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned());
        assert_eq!(registry.media_type("p1").await, Some(MediaType::Video));
        assert!(registry.verify("p1", token.as_deref()).await.is_ok());
    }
}
