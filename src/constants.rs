//! Shared constants for the generator and its HTTP surface.
//!

use std::time::Duration;

/// Replicate REST API base.
pub const REPLICATE_API_BASE: &str = "https://api.replicate.com/v1/";

/// Model used for prompt (+ optional image) to image generation.
pub const IMAGE_MODEL: &str = "black-forest-labs/flux-dev";

/// Model used for image + prompt to video generation.
pub const VIDEO_MODEL: &str = "wavespeedai/wan-2.1-i2v-720p";

/// How long the provider is asked to hold a blocking prediction open, in seconds.
pub const PROVIDER_WAIT_SECONDS: u64 = 60;

/// Delay between provider status checks while the blocking path waits for a result.
pub const PROVIDER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Delay between client-side status polls.
pub const CLIENT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default ceiling for a streamed provider output (64 MiB).
pub const DEFAULT_MAX_STREAM_BYTES: usize = 64 * 1024 * 1024;

/// Largest request body accepted, source images arrive inline as data URIs.
pub const MAX_REQUEST_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Upper bound on provider status checks in the blocking path (15 minutes at 500 ms).
pub const PROVIDER_MAX_POLLS: u32 = 1800;

/// Path the provider posts completion callbacks to.
pub const WEBHOOK_PATH: &str = "/api/webhook";

/// How long a started job accepts its completion callback.
pub const CALLBACK_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Most asynchronous jobs tracked at once.
pub const MAX_TRACKED_JOBS: usize = 1024;

/// Session key holding the id of the session's current job.
pub const SESSION_JOB_KEY: &str = "current_job";

/// Session idle expiry, in minutes.
pub const SESSION_IDLE_MINUTES: i64 = 60;

/// Message reported when the provider fails without saying why.
pub const GENERIC_FAILURE_MESSAGE: &str = "Generation failed";

#[cfg(test)]
/// Host used in tests
pub const TEST_HOST: &str = "mediagen.example.org";
