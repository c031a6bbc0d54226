//! CLI parser
use clap::Parser;
use std::num::NonZeroU16;

use crate::constants::DEFAULT_MAX_STREAM_BYTES;
use crate::job::JobMode;

#[derive(Parser, Debug)]
/// CLI Options
pub struct CliOptions {
    #[clap(long, help = "Enable debug logging", env = "MEDIAGEN_DEBUG")]
    /// Enable debug logging. Env: MEDIAGEN_DEBUG
    pub debug: bool,
    #[clap(long, short, default_value = "3000", env = "MEDIAGEN_PORT")]
    /// http listener, defaults to `3000`.
    /// Env: MEDIAGEN_PORT
    pub port: NonZeroU16,
    #[clap(
        long,
        short,
        default_value = "127.0.0.1",
        env = "MEDIAGEN_LISTEN_ADDRESS"
    )]
    /// Listen address, defaults to `127.0.0.1`.
    /// Env: MEDIAGEN_LISTEN_ADDRESS
    pub listen_address: String,

    #[clap(long, env = "REPLICATE_API_TOKEN", hide_env_values = true)]
    /// Replicate API token.
    /// Env: REPLICATE_API_TOKEN
    pub replicate_api_token: String,

    #[clap(long, value_enum, default_value = "synchronous", env = "MEDIAGEN_MODE")]
    /// `synchronous` waits for the output in the request, `asynchronous` hands back a job id
    /// and takes completion via webhook or polling.
    /// Env: MEDIAGEN_MODE
    pub mode: JobMode,

    #[clap(long, env = "MEDIAGEN_CALLBACK_BASE_URL")]
    /// Public base URL for provider webhooks, eg `https://mediagen.example.org`. Defaults to
    /// `https://` plus the Host of the submitting request.
    /// Env: MEDIAGEN_CALLBACK_BASE_URL
    pub callback_base_url: Option<String>,

    #[clap(long, default_value_t = DEFAULT_MAX_STREAM_BYTES, env = "MEDIAGEN_MAX_STREAM_BYTES")]
    /// Largest streamed output that will be inlined, in bytes.
    /// Env: MEDIAGEN_MAX_STREAM_BYTES
    pub max_stream_bytes: usize,

    #[clap(long, env = "MEDIAGEN_FILE_OUTPUT")]
    /// Download outputs and return them inline instead of returning provider URLs.
    /// Env: MEDIAGEN_FILE_OUTPUT
    pub file_output: bool,
}
