//! Submit a prompt to a running mediagen server and wait for the result.
//!
//!   mediagen_client "a lighthouse at dusk"
//!   mediagen_client --video --image cat.png "the cat starts dancing"

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose;
use clap::Parser;
use mediagen::client::GeneratorClient;
use mediagen::config::setup_logging;
use mediagen::constants::CLIENT_POLL_INTERVAL;
use mediagen::job::JobState;
use mediagen::media::MediaType;
use mediagen::poller::Poller;
use tracing::info;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "mediagen_client")]
#[command(about = "Generate an image or video through a mediagen server")]
struct Args {
    /// What to generate
    prompt: String,

    /// Image to start from (required for --video)
    #[arg(long)]
    image: Option<PathBuf>,

    /// Generate a video instead of an image
    #[arg(long)]
    video: bool,

    /// Server root
    #[arg(long, default_value = "http://127.0.0.1:3000/", env = "MEDIAGEN_SERVER")]
    server: Url,

    /// Seconds between status polls
    #[arg(long, default_value_t = CLIENT_POLL_INTERVAL.as_secs())]
    poll_seconds: u64,

    /// Give up after this many polls
    #[arg(long)]
    max_polls: Option<u32>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn image_data_uri(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mime = image::guess_format(&bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");
    Ok(format!(
        "data:{mime};base64,{}",
        general_purpose::STANDARD.encode(bytes)
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.debug).map_err(|err| anyhow!("Failed to set up logging: {err}"))?;

    let media_type = if args.video {
        MediaType::Video
    } else {
        MediaType::Image
    };
    let source_image = args.image.as_deref().map(image_data_uri).transpose()?;

    let client = GeneratorClient::new(args.server.clone());
    let submitted = client
        .submit(media_type, &args.prompt, source_image)
        .await
        .context("Submission failed")?;

    if let Some(media_url) = submitted.media_url {
        println!("{media_url}");
        return Ok(());
    }
    let job_id = submitted
        .job_id
        .ok_or_else(|| anyhow!("Server returned neither media nor a job id"))?;
    info!("Job {job_id} submitted, waiting for it to finish");

    let mut handle = Poller::new(Arc::new(client))
        .with_interval(Duration::from_secs(args.poll_seconds.max(1)))
        .with_max_polls(args.max_polls)
        .start(job_id.clone());
    let status = handle.wait().await.context("Polling failed")?;

    match (status.status, status.output) {
        (JobState::Succeeded, Some(media)) => {
            println!("{}", media.media_ref());
            Ok(())
        }
        _ => Err(anyhow!(
            "Job {job_id} failed: {}",
            status.error.unwrap_or_else(|| "unknown error".to_string())
        )),
    }
}
