//! Canonical media references handed back to callers.

use serde::{Deserialize, Serialize};

use crate::constants::{IMAGE_MODEL, VIDEO_MODEL};

/// What kind of media a generation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Prompt (+ optional image) to image
    Image,
    /// Image + prompt to video
    Video,
}

impl MediaType {
    /// MIME type used when the provider streams raw bytes for this media type.
    pub fn mime_type(self) -> &'static str {
        match self {
            MediaType::Image => "image/webp",
            MediaType::Video => "video/mp4",
        }
    }

    /// Provider model that serves this media type.
    pub fn model(self) -> &'static str {
        match self {
            MediaType::Image => IMAGE_MODEL,
            MediaType::Video => VIDEO_MODEL,
        }
    }

    /// Reverse of [MediaType::model]. Versioned ids (`owner/name:hash`) match too.
    pub fn from_model(model: &str) -> Option<Self> {
        let name = model.split(':').next().unwrap_or(model);
        [MediaType::Image, MediaType::Video]
            .into_iter()
            .find(|media_type| media_type.model() == name)
    }

    /// Video generation needs an image to animate.
    pub fn requires_source_image(self) -> bool {
        matches!(self, MediaType::Video)
    }
}

/// A remote URL or an inline base64 payload. Exactly one variant, always.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaResult {
    /// Where the provider put the output
    Url {
        /// The remote location
        url: String,
    },
    /// Output streamed back and inlined
    Inline {
        /// MIME type of the payload
        #[serde(rename = "mimeType")]
        mime_type: String,
        /// Base64 encoded bytes
        base64: String,
    },
}

impl MediaResult {
    /// Wraps a remote URL.
    pub fn url(url: impl Into<String>) -> Self {
        MediaResult::Url { url: url.into() }
    }

    /// Wraps an already base64 encoded payload.
    pub fn inline(mime_type: &str, base64: String) -> Self {
        MediaResult::Inline {
            mime_type: mime_type.to_string(),
            base64,
        }
    }

    /// Reverse of [MediaResult::media_ref].
    pub fn from_media_ref(media_ref: &str) -> Self {
        media_ref
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(";base64,"))
            .map(|(mime_type, base64)| MediaResult::inline(mime_type, base64.to_string()))
            .unwrap_or_else(|| MediaResult::url(media_ref))
    }

    /// The reference a browser can load directly, the URL or a `data:` URI.
    pub fn media_ref(&self) -> String {
        match self {
            MediaResult::Url { url } => url.clone(),
            MediaResult::Inline { mime_type, base64 } => format!("data:{mime_type};base64,{base64}"),
        }
    }
}
