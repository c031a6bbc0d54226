//! Caller-side polling of a job until it reaches a terminal status.
//!
//! A [Poller] is idle until [Poller::start] hands it a job id, which consumes it: a finished
//! poller can't be restarted, a new submission gets a new one. The returned [PollerHandle]
//! owns the timer task; dropping it (or calling [PollerHandle::cancel]) stops the polling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::constants::CLIENT_POLL_INTERVAL;
use crate::error::GenerationError;
use crate::job::JobStatus;

/// Anything that can report a job's current status.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// One status query.
    async fn status(&self, job_id: &str) -> Result<JobStatus, GenerationError>;
}

/// Where the poller is at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Not started
    Idle,
    /// Re-querying on every tick
    Polling,
    /// Saw a terminal status or gave up, no more queries
    Done,
}

/// The latest thing the poller knows.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSnapshot {
    /// Current state
    pub state: PollerState,
    /// Status queries issued so far
    pub polls: u32,
    /// Most recent status observed
    pub latest: Option<JobStatus>,
    /// Most recent query error, terminal once `state` is done
    pub error: Option<GenerationError>,
}

impl PollSnapshot {
    fn outcome(&self) -> Result<JobStatus, GenerationError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        self.latest
            .clone()
            .ok_or_else(|| GenerationError::Internal("poller finished without a status".to_string()))
    }
}

/// An idle poller.
pub struct Poller {
    source: Arc<dyn StatusSource>,
    interval: Duration,
    max_polls: Option<u32>,
}

impl Poller {
    /// Polls `source` every two seconds with no ceiling.
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self {
            source,
            interval: CLIENT_POLL_INTERVAL,
            max_polls: None,
        }
    }

    /// Changes the delay between queries.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Gives up with [GenerationError::GenerationTimedOut] after `max_polls` queries.
    pub fn with_max_polls(mut self, max_polls: Option<u32>) -> Self {
        self.max_polls = max_polls;
        self
    }

    /// Always [PollerState::Idle], a started poller is a [PollerHandle].
    pub fn state(&self) -> PollerState {
        PollerState::Idle
    }

    /// Starts polling `job_id` on the current tokio runtime. The first query goes out one
    /// interval from now.
    pub fn start(self, job_id: impl Into<String>) -> PollerHandle {
        let job_id = job_id.into();
        let (tx, updates) = watch::channel(PollSnapshot {
            state: PollerState::Polling,
            polls: 0,
            latest: None,
            error: None,
        });
        info!("Polling job {job_id} every {:?}", self.interval);
        let task = tokio::spawn(poll_loop(
            self.source,
            job_id,
            self.interval,
            self.max_polls,
            tx,
        ));
        PollerHandle { updates, task }
    }
}

/// A running (or finished) poll. Dropping it cancels the timer.
pub struct PollerHandle {
    updates: watch::Receiver<PollSnapshot>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Polling or done.
    pub fn state(&self) -> PollerState {
        self.updates.borrow().state
    }

    /// A copy of the latest snapshot.
    pub fn snapshot(&self) -> PollSnapshot {
        self.updates.borrow().clone()
    }

    /// A receiver that sees every snapshot from here on.
    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.updates.clone()
    }

    /// Waits for the terminal status. `Err` when the job can't be found, the poller gave
    /// up, or the status source failed for good.
    pub async fn wait(&mut self) -> Result<JobStatus, GenerationError> {
        let snapshot = self
            .updates
            .wait_for(|snapshot| snapshot.state == PollerState::Done)
            .await
            .map_err(|_| GenerationError::Internal("poller stopped before finishing".to_string()))?
            .clone();
        snapshot.outcome()
    }

    /// Stops polling.
    pub fn cancel(self) {}
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            debug!("Cancelling poller");
        }
        self.task.abort();
    }
}

async fn poll_loop(
    source: Arc<dyn StatusSource>,
    job_id: String,
    interval: Duration,
    max_polls: Option<u32>,
    tx: watch::Sender<PollSnapshot>,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polls: u32 = 0;

    loop {
        ticker.tick().await;
        if tx.borrow().state == PollerState::Done {
            break;
        }
        polls += 1;

        let outcome = source.status(&job_id).await;
        let finished = match &outcome {
            Ok(status) => {
                debug!("Job {job_id} poll {polls}: {:?}", status.status);
                status.is_terminal()
            }
            Err(GenerationError::ProviderUnavailable(detail)) => {
                warn!("Job {job_id} poll {polls} failed, will retry: {detail}");
                false
            }
            Err(err) => {
                warn!("Job {job_id} poll {polls} failed: {err}");
                true
            }
        };
        let timed_out = !finished && max_polls.is_some_and(|max| polls >= max);

        tx.send_modify(|snapshot| {
            snapshot.polls = polls;
            match outcome {
                Ok(status) => {
                    snapshot.latest = Some(status);
                    snapshot.error = None;
                }
                Err(err) => snapshot.error = Some(err),
            }
            if timed_out {
                snapshot.error = Some(GenerationError::GenerationTimedOut { polls });
            }
            if finished || timed_out {
                snapshot.state = PollerState::Done;
            }
        });

        if finished || timed_out {
            info!("Stopped polling job {job_id} after {polls} polls");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use crate::media::MediaResult;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Scripted {
        answers: Mutex<VecDeque<Result<JobStatus, GenerationError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(answers: Vec<Result<JobStatus, GenerationError>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for Scripted {
        async fn status(&self, _job_id: &str) -> Result<JobStatus, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(JobStatus::pending(JobState::Processing)))
        }
    }

    fn done() -> JobStatus {
        JobStatus::succeeded(MediaResult::url("https://cdn.example/v.mp4"))
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_terminal() {
        let source = Scripted::new(vec![
            Ok(JobStatus::pending(JobState::Starting)),
            Ok(JobStatus::pending(JobState::Processing)),
            Ok(done()),
        ]);
        let poller = Poller::new(source.clone());
        assert_eq!(poller.state(), PollerState::Idle);

        let mut handle = poller.start("p1");
        assert_eq!(handle.state(), PollerState::Polling);
        assert_eq!(handle.wait().await, Ok(done()));
        assert_eq!(handle.state(), PollerState::Done);
        assert_eq!(handle.snapshot().polls, 3);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_queries_after_done() {
        let source = Scripted::new(vec![Ok(done())]);
        let mut handle = Poller::new(source.clone()).start("p1");
        assert_eq!(handle.wait().await, Ok(done()));

        // handle still alive, timer never cancelled from outside
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls(), 1);
        assert_eq!(handle.state(), PollerState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels_the_timer() {
        let source = Scripted::new(vec![]);
        let handle = Poller::new(source.clone()).start("p1");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.calls(), 2);

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_job_stops_polling() {
        let source = Scripted::new(vec![
            Ok(JobStatus::pending(JobState::Starting)),
            Err(GenerationError::JobNotFound("p1".to_string())),
        ]);
        let mut handle = Poller::new(source.clone()).start("p1");
        assert_eq!(
            handle.wait().await,
            Err(GenerationError::JobNotFound("p1".to_string()))
        );
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let source = Scripted::new(vec![
            Err(GenerationError::ProviderUnavailable("timeout".to_string())),
            Ok(done()),
        ]);
        let mut handle = Poller::new(source.clone()).start("p1");
        assert_eq!(handle.wait().await, Ok(done()));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn max_polls_times_out() {
        let source = Scripted::new(vec![]);
        let mut handle = Poller::new(source.clone())
            .with_interval(Duration::from_millis(100))
            .with_max_polls(Some(3))
            .start("p1");
        assert_eq!(
            handle.wait().await,
            Err(GenerationError::GenerationTimedOut { polls: 3 })
        );
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.latest, Some(JobStatus::pending(JobState::Processing)));
        assert_eq!(source.calls(), 3);
    }
}
