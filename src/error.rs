//! Error handling

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{Value, json};
use tracing::{error, info, warn};

/// Everything that can go wrong between a prompt arriving and a media reference leaving.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    /// Missing prompt or image, or an image we can't accept
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The provider could not be reached or answered with garbage
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// The provider rejected or failed the prediction
    #[error("generation failed: {0}")]
    GenerationFailed(String),
    /// The provider returned an output shape the normalizer doesn't know
    #[error("unrecognized output shape: {0}")]
    UnrecognizedOutputShape(Value),
    /// A streamed output failed part way through
    #[error("stream read error: {0}")]
    StreamReadError(String),
    /// A streamed output went past the byte budget
    #[error("payload larger than {limit} bytes")]
    PayloadTooLarge {
        /// The budget that was exceeded
        limit: usize,
    },
    /// Stale or invalid job identifier
    #[error("job not found: {0}")]
    JobNotFound(String),
    /// The poller gave up before the job reached a terminal status
    #[error("generation timed out after {polls} polls")]
    GenerationTimedOut {
        /// How many status queries were issued
        polls: u32,
    },
    /// Anything else on our side
    #[error("internal error: {0}")]
    Internal(String),
}

impl GenerationError {
    /// The HTTP status this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GenerationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GenerationError::JobNotFound(_) => StatusCode::NOT_FOUND,
            GenerationError::GenerationTimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text that's safe to show to an end user, provider payloads stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::InvalidRequest(reason) => reason.clone(),
            GenerationError::JobNotFound(id) => format!("Job {id} was not found"),
            GenerationError::UnrecognizedOutputShape(_) => {
                "Unexpected response format from AI model".to_string()
            }
            GenerationError::PayloadTooLarge { .. } => {
                "Generated media was too large to return".to_string()
            }
            GenerationError::GenerationTimedOut { .. } => "Generation timed out".to_string(),
            _ => "Failed to generate media".to_string(),
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::ProviderUnavailable(err.to_string())
    }
}

impl From<JsonRejection> for GenerationError {
    fn from(rejection: JsonRejection) -> Self {
        GenerationError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for GenerationError {
    fn from(rejection: QueryRejection) -> Self {
        GenerationError::InvalidRequest(rejection.body_text())
    }
}

impl From<url::ParseError> for GenerationError {
    fn from(err: url::ParseError) -> Self {
        GenerationError::Internal(err.to_string())
    }
}

impl From<tower_sessions::session::Error> for GenerationError {
    fn from(err: tower_sessions::session::Error) -> Self {
        GenerationError::Internal(err.to_string())
    }
}

impl IntoResponse for GenerationError {
    fn into_response(self) -> axum::response::Response {
        match &self {
            GenerationError::InvalidRequest(reason) => info!("Bad request received: {reason}"),
            GenerationError::JobNotFound(id) => warn!("404 job {id}"),
            GenerationError::UnrecognizedOutputShape(raw) => {
                error!("Unexpected output format from provider: {raw}")
            }
            other => error!("Generation error: {other}"),
        }
        let body = json!({
            "success": false,
            "error": self.user_message(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

/// Startup-time configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No provider credential was supplied
    #[error("the provider API token is missing or empty")]
    MissingCredential,
    /// A URL option didn't parse
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(
            GenerationError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GenerationError::JobNotFound("p1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GenerationError::UnrecognizedOutputShape(json!({})).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GenerationError::PayloadTooLarge { limit: 1 }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn raw_payload_is_not_shown_to_users() {
        let err = GenerationError::UnrecognizedOutputShape(json!({"secret": "debug"}));
        assert!(!err.user_message().contains("secret"));
    }
}
