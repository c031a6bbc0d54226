//! Drains streamed provider output into a single base64 payload.

use base64::Engine;
use base64::engine::general_purpose;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::debug;

use crate::error::GenerationError;

/// Error a chunk producer can raise mid-stream.
pub type ChunkError = Box<dyn std::error::Error + Send + Sync>;

/// A lazily produced, finite, ordered sequence of binary chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, ChunkError>>;

/// Builds a [ByteStream] from chunks already in memory.
pub fn byte_stream_from_chunks<I>(chunks: I) -> ByteStream
where
    I: IntoIterator<Item = Vec<u8>>,
    I::IntoIter: Send + 'static,
{
    futures::stream::iter(chunks.into_iter().map(|chunk| Ok(Bytes::from(chunk)))).boxed()
}

/// Pulls every chunk in order, stopping at end-of-stream, and returns the concatenated bytes.
///
/// Fails with [GenerationError::StreamReadError] if the producer errors (whatever was
/// already read is dropped) and with [GenerationError::PayloadTooLarge] as soon as the
/// total would pass `max_bytes`.
pub async fn collect_bytes(
    mut stream: ByteStream,
    max_bytes: usize,
) -> Result<Vec<u8>, GenerationError> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunks = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| GenerationError::StreamReadError(err.to_string()))?;
        if buffer.len().saturating_add(chunk.len()) > max_bytes {
            return Err(GenerationError::PayloadTooLarge { limit: max_bytes });
        }
        buffer.extend_from_slice(&chunk);
        chunks += 1;
    }
    debug!("Collected {} bytes from {} chunks", buffer.len(), chunks);
    Ok(buffer)
}

/// [collect_bytes], then base64 (standard alphabet, padded).
pub async fn collect_base64(stream: ByteStream, max_bytes: usize) -> Result<String, GenerationError> {
    let buffer = collect_bytes(stream, max_bytes).await?;
    Ok(general_purpose::STANDARD.encode(buffer))
}
