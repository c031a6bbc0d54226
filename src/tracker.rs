//! Maps provider job state onto [JobStatus].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::GeneratorConfig;
use crate::constants::GENERIC_FAILURE_MESSAGE;
use crate::error::GenerationError;
use crate::job::{JobState, JobStatus};
use crate::media::MediaType;
use crate::normalize::Normalizer;
use crate::poller::StatusSource;
use crate::provider::{Prediction, PredictionWire, Provider};
use crate::registry::JobRegistry;

/// Answers "where is job X at" from the provider.
#[derive(Clone)]
pub struct StatusTracker {
    provider: Arc<dyn Provider>,
    config: Arc<GeneratorConfig>,
    registry: Arc<JobRegistry>,
}

impl StatusTracker {
    /// A tracker over `provider`, using `registry` for what each job was asked to produce.
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

    /// Queries the provider for the job and maps what it says.
    pub async fn status(&self, job_id: &str) -> Result<JobStatus, GenerationError> {
        if job_id.trim().is_empty() {
            return Err(GenerationError::JobNotFound(job_id.to_string()));
        }
        let prediction = self.provider.get_prediction(job_id).await?;
        Ok(self.resolve(prediction).await)
    }

    /// Same mapping for a completion callback the provider pushed to us.
    pub async fn resolve_callback(&self, wire: PredictionWire) -> (String, JobStatus) {
        let prediction = self.provider.to_prediction(wire);
        let id = prediction.id.clone();
        (id, self.resolve(prediction).await)
    }

    /// A success whose output can't be read is reported as a failure.
    async fn resolve(&self, prediction: Prediction) -> JobStatus {
        let state = JobState::from_provider(&prediction.status);
        debug!("Job {} is {} ({:?})", prediction.id, prediction.status, state);
        match state {
            JobState::Starting | JobState::Processing => JobStatus::pending(state),
            JobState::Failed => JobStatus::failed(
                prediction
                    .error
                    .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string()),
            ),
            JobState::Succeeded => {
                let media_type = match prediction.media_type() {
                    Some(media_type) => media_type,
                    None => self
                        .registry
                        .media_type(&prediction.id)
                        .await
                        .unwrap_or(MediaType::Image),
                };
                match Normalizer::new(media_type, self.config.max_stream_bytes)
                    .normalize(prediction.output)
                    .await
                {
                    Ok(media) => JobStatus::succeeded(media),
                    Err(GenerationError::UnrecognizedOutputShape(raw)) => {
                        error!("Job {} succeeded with unexpected output: {raw}", prediction.id);
                        JobStatus::failed("UnrecognizedOutputShape")
                    }
                    Err(err) => {
                        error!("Job {} output could not be read: {err}", prediction.id);
                        JobStatus::failed(err.user_message())
                    }
                }
            }
        }
    }
}

#[async_trait]
impl StatusSource for StatusTracker {
    async fn status(&self, job_id: &str) -> Result<JobStatus, GenerationError> {
        StatusTracker::status(self, job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::byte_stream_from_chunks;
    use crate::job::JobMode;
    use crate::media::MediaResult;
    use crate::normalize::ProviderOutput;
    use crate::provider::testing::{ScriptedProvider, Step};
    use serde_json::json;

    fn tracker(steps: Vec<Step>) -> StatusTracker {
        StatusTracker::new(
            Arc::new(ScriptedProvider::polling(steps)),
            Arc::new(GeneratorConfig::new("r8_test", JobMode::Asynchronous)),
            Arc::new(JobRegistry::new()),
        )
    }

    #[tokio::test]
    async fn pending_states_pass_through() {
        let tracker = tracker(vec![Step::status("starting"), Step::status("processing")]);
        assert_eq!(
            tracker.status("p1").await.unwrap(),
            JobStatus::pending(JobState::Starting)
        );
        assert_eq!(
            tracker.status("p1").await.unwrap(),
            JobStatus::pending(JobState::Processing)
        );
    }

    #[tokio::test]
    async fn success_carries_normalized_output() {
        let tracker = tracker(vec![Step::status("succeeded").with_output(|| {
            ProviderOutput::from_json(json!(["https://cdn.example/v.mp4"]))
        })]);
        assert_eq!(
            tracker.status("p1").await.unwrap(),
            JobStatus::succeeded(MediaResult::url("https://cdn.example/v.mp4"))
        );
    }

    #[tokio::test]
    async fn streamed_success_uses_the_job_media_type() {
        let tracker = tracker(vec![Step::status("succeeded").with_output(|| {
            ProviderOutput::ByteStream(byte_stream_from_chunks(vec![b"GIF89a".to_vec()]))
        })]);
        let status = tracker.status("p1").await.unwrap();
        assert_eq!(
            status.output.map(|media| media.media_ref()),
            Some("data:video/mp4;base64,R0lGODlh".to_string())
        );
    }

    #[tokio::test]
    async fn streamed_success_without_a_model_uses_the_registered_media_type() {
        let registry = Arc::new(JobRegistry::new());
        registry
            .register("p1", MediaType::Video, "t".to_string())
            .await;
        let tracker = StatusTracker::new(
            Arc::new(ScriptedProvider::polling(vec![
                Step::status("succeeded")
                    .without_model()
                    .with_output(|| {
                        ProviderOutput::ByteStream(byte_stream_from_chunks(vec![b"GIF89a".to_vec()]))
                    }),
            ])),
            Arc::new(GeneratorConfig::new("r8_test", JobMode::Asynchronous)),
            registry,
        );
        let status = tracker.status("p1").await.unwrap();
        assert_eq!(
            status.output.map(|media| media.media_ref()),
            Some("data:video/mp4;base64,R0lGODlh".to_string())
        );
    }

    #[tokio::test]
    async fn unreadable_success_is_a_failure() {
        let tracker = tracker(vec![
            Step::status("succeeded").with_output(|| ProviderOutput::from_json(json!({}))),
        ]);
        let status = tracker.status("p1").await.unwrap();
        assert_eq!(status, JobStatus::failed("UnrecognizedOutputShape"));
    }

    #[tokio::test]
    async fn failure_without_detail_gets_a_generic_message() {
        let tracker = tracker(vec![
            Step::status("failed"),
            Step::status("failed").with_error("NSFW content detected"),
        ]);
        assert_eq!(
            tracker.status("p1").await.unwrap(),
            JobStatus::failed(GENERIC_FAILURE_MESSAGE)
        );
        assert_eq!(
            tracker.status("p1").await.unwrap(),
            JobStatus::failed("NSFW content detected")
        );
    }

    #[tokio::test]
    async fn unknown_jobs_are_not_found() {
        let tracker = tracker(vec![]);
        assert_eq!(
            tracker.status("nope").await,
            Err(GenerationError::JobNotFound("nope".to_string()))
        );
        assert_eq!(
            tracker.status("").await,
            Err(GenerationError::JobNotFound(String::new()))
        );
    }

    #[tokio::test]
    async fn completion_callbacks_follow_the_poll_path() {
        let tracker = tracker(vec![]);
        let wire: PredictionWire = serde_json::from_value(json!({
            "jobId": "p1",
            "status": "completed",
            "output": {},
        }))
        .unwrap();
        let (id, status) = tracker.resolve_callback(wire).await;
        assert_eq!(id, "p1");
        assert_eq!(status, JobStatus::failed("UnrecognizedOutputShape"));
    }
}
