use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{debug, info};

use super::AppState;
use super::middleware::RequestHost;
use super::schemas::{StatusResponse, SubmitBody, SubmitResponse};
use crate::constants::SESSION_JOB_KEY;
use crate::error::GenerationError;
use crate::job::{GenerationRequest, JobStatus};
use crate::media::MediaType;
use crate::provider::PredictionWire;
use crate::submitter::Submission;

/// handles POST /api/generate
pub(crate) async fn generate_image_handler(
    host: RequestHost,
    session: Session,
    State(state): State<AppState>,
    body: Result<Json<SubmitBody>, JsonRejection>,
) -> Result<Json<SubmitResponse>, GenerationError> {
    let Json(body) = body?;
    submit(&state, &host, &session, MediaType::Image, body).await
}

/// handles POST /api/generate/video
pub(crate) async fn generate_video_handler(
    host: RequestHost,
    session: Session,
    State(state): State<AppState>,
    body: Result<Json<SubmitBody>, JsonRejection>,
) -> Result<Json<SubmitResponse>, GenerationError> {
    let Json(body) = body?;
    submit(&state, &host, &session, MediaType::Video, body).await
}

async fn submit(
    state: &AppState,
    host: &RequestHost,
    session: &Session,
    media_type: MediaType,
    body: SubmitBody,
) -> Result<Json<SubmitResponse>, GenerationError> {
    let prompt = body.prompt.unwrap_or_default();
    let request = GenerationRequest::new(media_type, prompt.clone(), body.source_image);

    match state.submitter.submit(&request, host.host.as_deref()).await? {
        Submission::Completed(media) => {
            session.remove::<String>(SESSION_JOB_KEY).await?;
            Ok(Json(SubmitResponse {
                success: true,
                media_url: Some(media.media_ref()),
                prompt: Some(prompt),
                ..Default::default()
            }))
        }
        Submission::Started { job, status } => {
            // one job per session, a new submission replaces the old one
            session.insert(SESSION_JOB_KEY, &job.id).await?;
            Ok(Json(SubmitResponse {
                success: true,
                job_id: Some(job.id),
                status: Some(status.status),
                prompt: Some(prompt),
                ..Default::default()
            }))
        }
    }
}

/// handles GET /api/status/{job_id}
pub(crate) async fn status_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>, GenerationError> {
    Ok(Json(lookup(&state, &job_id).await?.into()))
}

/// handles GET /api/status, for the session's current job
pub(crate) async fn session_status_handler(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<StatusResponse>, GenerationError> {
    let job_id = session
        .get::<String>(SESSION_JOB_KEY)
        .await?
        .ok_or_else(|| GenerationError::JobNotFound("(no job in this session)".to_string()))?;
    Ok(Json(lookup(&state, &job_id).await?.into()))
}

/// A completion callback beats asking the provider again.
async fn lookup(state: &AppState, job_id: &str) -> Result<JobStatus, GenerationError> {
    if let Some(status) = state.registry.take_delivered(job_id).await {
        debug!("Job {job_id} answered from webhook delivery");
        return Ok(status);
    }
    state.tracker.status(job_id).await
}

#[derive(Debug, Deserialize)]
pub(crate) struct CallbackParams {
    token: Option<String>,
}

/// handles POST /api/webhook?token=..., only for jobs this server started
pub(crate) async fn webhook_handler(
    State(state): State<AppState>,
    params: Result<Query<CallbackParams>, QueryRejection>,
    body: Result<Json<PredictionWire>, JsonRejection>,
) -> Result<Json<StatusResponse>, GenerationError> {
    let Query(params) = params?;
    let Json(wire) = body?;
    state
        .registry
        .verify(&wire.id, params.token.as_deref())
        .await?;

    let (job_id, status) = state.tracker.resolve_callback(wire).await;
    info!("Webhook for job {job_id}: {:?}", status.status);
    if status.is_terminal() {
        state.registry.deliver(&job_id, status.clone()).await;
    }
    Ok(Json(status.into()))
}
