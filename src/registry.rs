//! Jobs this process started, and the completion callbacks delivered for them.
//!
//! Only jobs created by the submitter are known here, each with the callback token baked into
//! its webhook address. A callback for an unknown job, or with the wrong token, is refused.
//! Entries expire after [CALLBACK_RETENTION] and the table never holds more than
//! [MAX_TRACKED_JOBS] jobs; the oldest is evicted first.

use std::collections::HashMap;
use std::time::Duration;

use rand::RngExt;
use rand::distr::Alphanumeric;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::constants::{CALLBACK_RETENTION, MAX_TRACKED_JOBS};
use crate::error::GenerationError;
use crate::job::JobStatus;
use crate::media::MediaType;

/// A fresh secret for one job's webhook address.
pub fn callback_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

struct TrackedJob {
    media_type: MediaType,
    token: String,
    registered_at: Instant,
    delivered: Option<JobStatus>,
}

/// Asynchronous jobs in flight, keyed by provider job id.
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, TrackedJob>>,
    retention: Duration,
    capacity: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    /// A registry with the default retention and capacity.
    pub fn new() -> Self {
        Self::with_limits(CALLBACK_RETENTION, MAX_TRACKED_JOBS)
    }

    /// A registry that forgets jobs after `retention` and holds at most `capacity` of them.
    pub fn with_limits(retention: Duration, capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            retention,
            capacity: capacity.max(1),
        }
    }

    /// Records a job the submitter just created.
    pub async fn register(&self, job_id: &str, media_type: MediaType, token: String) {
        let mut jobs = self.jobs.lock().await;
        self.prune(&mut jobs);
        while jobs.len() >= self.capacity {
            let Some(oldest) = jobs
                .iter()
                .min_by_key(|(_, job)| job.registered_at)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            warn!("Job table full, forgetting job {oldest}");
            jobs.remove(&oldest);
        }
        jobs.insert(
            job_id.to_string(),
            TrackedJob {
                media_type,
                token,
                registered_at: Instant::now(),
                delivered: None,
            },
        );
    }

    /// What the job was asked to produce, if we started it.
    pub async fn media_type(&self, job_id: &str) -> Option<MediaType> {
        self.jobs.lock().await.get(job_id).map(|job| job.media_type)
    }

    /// Checks a completion callback came for a job we started, carrying its token.
    pub async fn verify(&self, job_id: &str, token: Option<&str>) -> Result<(), GenerationError> {
        let mut jobs = self.jobs.lock().await;
        self.prune(&mut jobs);
        match (jobs.get(job_id), token) {
            (Some(job), Some(token)) if job.token == token => Ok(()),
            (Some(_), _) => {
                warn!("Callback for job {job_id} had a bad token");
                Err(GenerationError::JobNotFound(job_id.to_string()))
            }
            (None, _) => Err(GenerationError::JobNotFound(job_id.to_string())),
        }
    }

    /// Keeps a terminal status for the next poll of that job.
    pub async fn deliver(&self, job_id: &str, status: JobStatus) {
        if let Some(job) = self.jobs.lock().await.get_mut(job_id) {
            job.delivered = Some(status);
        }
    }

    /// Hands over a delivered status once, forgetting the job.
    pub async fn take_delivered(&self, job_id: &str) -> Option<JobStatus> {
        let mut jobs = self.jobs.lock().await;
        if jobs.get(job_id)?.delivered.is_none() {
            return None;
        }
        jobs.remove(job_id).and_then(|job| job.delivered)
    }

    /// Number of jobs currently tracked.
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Whether no jobs are tracked.
    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    fn prune(&self, jobs: &mut HashMap<String, TrackedJob>) {
        let before = jobs.len();
        jobs.retain(|_, job| job.registered_at.elapsed() < self.retention);
        if jobs.len() < before {
            debug!("Expired {} tracked jobs", before - jobs.len());
        }
    }
}
