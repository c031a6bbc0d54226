//! Generation requests, jobs and the statuses observed for them.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::GenerationError;
use crate::media::{MediaResult, MediaType};

#[allow(clippy::expect_used)]
static DATA_URI_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:(?P<mime>[\w.+-]+/[\w.+-]+)(?:;[\w.+-]+=[\w.+-]+)*;base64$")
        .expect("data URI header pattern")
});

/// ISO-BMFF brands used by HEIC/HEIF files.
const HEIF_BRANDS: &[&[u8]] = &[b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1"];

/// Whether the server blocks on the provider or hands back a job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    /// Wait for the output within the request
    Synchronous,
    /// Return a job id, completion arrives by poll or webhook
    Asynchronous,
}

/// What the user asked for. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    prompt: String,
    source_image: Option<String>,
    media_type: MediaType,
}

impl GenerationRequest {
    /// Builds a request; nothing is checked until [GenerationRequest::validate].
    pub fn new(media_type: MediaType, prompt: impl Into<String>, source_image: Option<String>) -> Self {
        Self {
            prompt: prompt.into(),
            source_image,
            media_type,
        }
    }

    /// The user's prompt.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// The uploaded image as a data URI, if any.
    pub fn source_image(&self) -> Option<&str> {
        self.source_image.as_deref()
    }

    /// Image or video.
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Checks everything that can be checked without talking to the provider.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.prompt.trim().is_empty() {
            return Err(GenerationError::InvalidRequest("Prompt is required".to_string()));
        }
        match self.source_image.as_deref().filter(|image| !image.trim().is_empty()) {
            Some(image) => validate_source_image(image),
            None if self.media_type.requires_source_image() => Err(
                GenerationError::InvalidRequest("Prompt and image are required".to_string()),
            ),
            None => Ok(()),
        }
    }

    /// The fixed model input for this request's media type.
    pub fn provider_input(&self) -> Value {
        let image = self.source_image.as_deref().filter(|image| !image.trim().is_empty());
        match self.media_type {
            MediaType::Image => {
                let mut input = json!({
                    "prompt": self.prompt,
                    "output_format": "webp",
                    "num_outputs": 1,
                    "aspect_ratio": "1:1",
                    "go_fast": true,
                });
                if let (Some(image), Some(map)) = (image, input.as_object_mut()) {
                    map.insert("image".to_string(), Value::String(image.to_string()));
                }
                input
            }
            MediaType::Video => json!({
                "image": image,
                "prompt": self.prompt,
                "max_area": "720x1280",
                "fast_mode": "Balanced",
                "lora_scale": 1,
                "num_frames": 81,
                "sample_shift": 5,
                "sample_steps": 30,
                "frames_per_second": 16,
                "sample_guide_scale": 5,
            }),
        }
    }
}

fn validate_source_image(image: &str) -> Result<(), GenerationError> {
    let invalid = || GenerationError::InvalidRequest("Image must be a base64 data URI".to_string());
    let (header, payload) = image.split_once(',').ok_or_else(invalid)?;
    let captures = DATA_URI_HEADER.captures(header).ok_or_else(invalid)?;
    let declared = captures
        .name("mime")
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_default();

    if declared == "image/heic" || declared == "image/heif" {
        return Err(heic_unsupported());
    }
    if payload.is_empty() {
        return Err(invalid());
    }

    // enough of the payload to sniff the magic bytes
    let head_len = payload.len().min(32) / 4 * 4;
    let head = if head_len == 0 {
        general_purpose::STANDARD.decode(payload)
    } else {
        general_purpose::STANDARD.decode(payload.get(..head_len).ok_or_else(invalid)?)
    }
    .map_err(|_| invalid())?;

    if is_heif(&head) {
        return Err(heic_unsupported());
    }
    match image::guess_format(&head) {
        Ok(format) if format.to_mime_type() != declared => warn!(
            "Source image declared as {declared} but looks like {}",
            format.to_mime_type()
        ),
        Ok(format) => debug!("Source image format {:?}", format),
        Err(_) => debug!("Could not sniff source image format, declared {declared}"),
    }
    Ok(())
}

fn is_heif(head: &[u8]) -> bool {
    head.get(4..8) == Some(b"ftyp".as_slice())
        && head
            .get(8..12)
            .is_some_and(|brand| HEIF_BRANDS.contains(&brand))
}

fn heic_unsupported() -> GenerationError {
    GenerationError::InvalidRequest("HEIC images are not supported".to_string())
}

/// One remote generation, tracked by the provider's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Provider-assigned opaque identifier
    pub id: String,
    /// When the job was handed to the provider
    #[serde(rename = "submittedAt")]
    pub submitted_at: DateTime<Utc>,
    /// How the job was submitted
    pub mode: JobMode,
}

impl Job {
    /// A job submitted now.
    pub fn new(id: impl Into<String>, mode: JobMode) -> Self {
        Self {
            id: id.into(),
            submitted_at: Utc::now(),
            mode,
        }
    }
}

/// Canonical job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Accepted, not running yet
    Starting,
    /// Running
    Processing,
    /// Finished with an output
    Succeeded,
    /// Finished without one
    Failed,
}

impl JobState {
    /// Maps the provider's status vocabulary. Unknown words are treated as still running.
    pub fn from_provider(status: &str) -> Self {
        match status {
            "starting" => JobState::Starting,
            "succeeded" | "completed" => JobState::Succeeded,
            "failed" | "canceled" | "cancelled" | "aborted" => JobState::Failed,
            _ => JobState::Processing,
        }
    }

    /// No further transitions follow.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// One observation of a job. Output only on success, error only on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Canonical state
    pub status: JobState,
    /// The normalized output, present only when succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<MediaResult>,
    /// Why it failed, present only when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatus {
    /// A status that's still in flight.
    pub fn pending(status: JobState) -> Self {
        Self {
            status,
            output: None,
            error: None,
        }
    }

    /// A finished job with its output.
    pub fn succeeded(output: MediaResult) -> Self {
        Self {
            status: JobState::Succeeded,
            output: Some(output),
            error: None,
        }
    }

    /// A finished job without output.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobState::Failed,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Succeeded or failed.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
