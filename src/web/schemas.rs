//! JSON bodies of the HTTP API.

use serde::{Deserialize, Serialize};

use crate::job::{JobState, JobStatus};
use crate::media::MediaResult;

/// `POST /api/generate` and `POST /api/generate/video`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    /// What to generate
    #[serde(default)]
    pub prompt: Option<String>,
    /// Uploaded image as a data URI
    #[serde(default, alias = "image", skip_serializing_if = "Option::is_none")]
    pub source_image: Option<String>,
}

/// Answer to a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    /// false on any error
    pub success: bool,
    /// Asynchronous mode: the job to poll
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Asynchronous mode: always `starting`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobState>,
    /// Synchronous mode: URL or data URI of the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// The prompt that was submitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// What went wrong
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Answer to a status poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Canonical status
    pub status: JobState,
    /// URL or data URI, when succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Why, when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<JobStatus> for StatusResponse {
    fn from(status: JobStatus) -> Self {
        Self {
            status: status.status,
            output: status.output.map(|media| media.media_ref()),
            error: status.error,
        }
    }
}

impl From<StatusResponse> for JobStatus {
    fn from(resp: StatusResponse) -> Self {
        Self {
            status: resp.status,
            output: resp.output.as_deref().map(MediaResult::from_media_ref),
            error: resp.error,
        }
    }
}
