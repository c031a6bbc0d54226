//! HTTP routes: submission, status polling and the provider webhook.

use std::num::NonZeroU16;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};
use tracing::{error, info};

use crate::config::GeneratorConfig;
use crate::constants::{MAX_REQUEST_BODY_BYTES, SESSION_IDLE_MINUTES, WEBHOOK_PATH};
use crate::provider::Provider;
use crate::registry::JobRegistry;
use crate::submitter::JobSubmitter;
use crate::tracker::StatusTracker;

mod api;
mod middleware;
pub mod schemas;

use api::{
    generate_image_handler, generate_video_handler, session_status_handler, status_handler,
    webhook_handler,
};

#[derive(Clone)]
pub(crate) struct AppState {
    submitter: JobSubmitter,
    tracker: StatusTracker,
    /// Started jobs, and terminal statuses delivered by webhook waiting for the next poll.
    registry: Arc<JobRegistry>,
}

impl AppState {
    fn new(config: Arc<GeneratorConfig>, provider: Arc<dyn Provider>) -> Self {
        let registry = Arc::new(JobRegistry::new());
        Self {
            submitter: JobSubmitter::new(provider.clone(), config.clone(), registry.clone()),
            tracker: StatusTracker::new(provider, config, registry.clone()),
            registry,
        }
    }
}

fn create_router() -> Router<AppState> {
    Router::new()
        .route("/api/generate", post(generate_image_handler))
        .route("/api/generate/video", post(generate_video_handler))
        .route("/api/status", get(session_status_handler))
        .route("/api/status/{job_id}", get(status_handler))
        .route(WEBHOOK_PATH, post(webhook_handler))
}

fn create_app(state: AppState) -> Router {
    let sessions = SessionManagerLayer::new(MemoryStore::default()).with_expiry(
        Expiry::OnInactivity(time::Duration::minutes(SESSION_IDLE_MINUTES)),
    );

    create_router()
        .layer(sessions)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API until ctrl-c.
pub async fn setup_server(
    listen_addr: &str,
    port: NonZeroU16,
    config: Arc<GeneratorConfig>,
    provider: Arc<dyn Provider>,
) -> Result<(), anyhow::Error> {
    info!("Generation mode: {:?}", config.mode);
    let app = create_app(AppState::new(config, provider));

    let addr = format!("{}:{}", listen_addr, port);
    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", err);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
