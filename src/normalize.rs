//! Turns whatever shape the provider handed back into a single [MediaResult].

use serde_json::Value;

use crate::collector::{ByteStream, collect_base64};
use crate::error::GenerationError;
use crate::media::{MediaResult, MediaType};

/// Provider output, classified up front.
pub enum ProviderOutput {
    /// A bare string, taken to be a URL
    Text(String),
    /// An ordered list, only the first element is looked at
    Sequence(Vec<ProviderOutput>),
    /// Raw bytes streamed back instead of a URL
    ByteStream(ByteStream),
    /// Anything else, kept for the logs
    Unrecognized(Value),
}

impl ProviderOutput {
    /// Classifies a JSON output value. JSON can't carry a byte stream, so those only come
    /// from providers that build them directly.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(text) => ProviderOutput::Text(text),
            Value::Array(items) => {
                ProviderOutput::Sequence(items.into_iter().map(ProviderOutput::from_json).collect())
            }
            other => ProviderOutput::Unrecognized(other),
        }
    }

    /// A JSON rendering for diagnostics.
    pub fn describe(&self) -> Value {
        match self {
            ProviderOutput::Text(text) => Value::String(text.clone()),
            ProviderOutput::Sequence(items) => {
                Value::Array(items.iter().map(ProviderOutput::describe).collect())
            }
            ProviderOutput::ByteStream(_) => Value::String("<byte stream>".to_string()),
            ProviderOutput::Unrecognized(raw) => raw.clone(),
        }
    }
}

impl std::fmt::Debug for ProviderOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProviderOutput({})", self.describe())
    }
}

/// Normalizes output for one media type.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    media_type: MediaType,
    max_stream_bytes: usize,
}

impl Normalizer {
    /// `max_stream_bytes` caps how much a byte stream may produce before it's abandoned.
    pub fn new(media_type: MediaType, max_stream_bytes: usize) -> Self {
        Self {
            media_type,
            max_stream_bytes,
        }
    }

    /// Returns the canonical media reference, or [GenerationError::UnrecognizedOutputShape]
    /// with the raw value when the shape isn't one we know.
    pub async fn normalize(&self, output: ProviderOutput) -> Result<MediaResult, GenerationError> {
        match output {
            ProviderOutput::Text(url) => Ok(MediaResult::url(url)),
            ProviderOutput::ByteStream(stream) => self.inline(stream).await,
            ProviderOutput::Sequence(items) => {
                let raw = Value::Array(items.iter().map(ProviderOutput::describe).collect());
                match items.into_iter().next() {
                    Some(ProviderOutput::Text(url)) => Ok(MediaResult::url(url)),
                    Some(ProviderOutput::ByteStream(stream)) => self.inline(stream).await,
                    _ => Err(GenerationError::UnrecognizedOutputShape(raw)),
                }
            }
            ProviderOutput::Unrecognized(raw) => Err(GenerationError::UnrecognizedOutputShape(raw)),
        }
    }

    async fn inline(&self, stream: ByteStream) -> Result<MediaResult, GenerationError> {
        let encoded = collect_base64(stream, self.max_stream_bytes).await?;
        Ok(MediaResult::inline(self.media_type.mime_type(), encoded))
    }
}
