//! An in-process priority job queue.
//!
//! Producers [`JobQueue::add`] jobs of a given type, handlers registered with
//! [`JobQueue::register`] execute them, and a background scheduler started with
//! [`JobQueue::start`] dispatches eligible jobs by priority without exceeding the configured
//! concurrency. Failed attempts are retried after a delay, running jobs can be cancelled
//! cooperatively, and every lifecycle transition is published as a [`JobEvent`].
//!
//! ```
//! # use jobqueue::prelude::*;
//! # use serde_json::json;
//! async fn send_email(ctx: JobContext) -> HandlerResult {
//!     let to: String = ctx.payload_as()?;
//!     Ok(json!({ "sent_to": to }))
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let queue = JobQueue::new(QueueConfig::default().with_concurrency(2));
//! queue.register("email", send_email);
//! queue.start();
//!
//! let job = queue
//!     .add("email", json!("to@example.com"), JobOptions::default().with_priority(Priority::High))
//!     .unwrap();
//! assert_eq!(job.status, JobStatus::Pending);
//!
//! queue.shutdown().await.unwrap();
//! # });
//! ```
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::TimeDelta;
use futures::Stream;
use serde_json::Value;
use thiserror::Error;
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

pub mod backoff;
pub mod context;
pub mod events;
pub mod handler;
pub mod job;
pub mod prelude;
pub mod pruner;
mod scheduler;
pub mod stats;
mod store;

pub use backoff::{Backoff, Jitter};
pub use context::JobContext;
pub use events::{JobEvent, JobEventKind, Subscription, SubscriptionGuard};
pub use handler::{HandlerError, HandlerResult, JobHandler};
pub use job::{builder::JobOptions, ErrorType, Job, JobError, JobId, JobStatus, Priority};
pub use stats::QueueStats;

use events::EventBus;
use handler::HandlerRegistry;
use job::runner::JobRunner;
use pruner::{runner::PrunerRunner, PrunerConfig};
use scheduler::Scheduler;
use store::{Cancellation, Inserted, JobStore};

/// Configuration for a [`JobQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// The maximum number of jobs running at the same time. Zero is raised to one.
    pub concurrency: usize,
    /// How often the scheduler looks for eligible jobs when nothing wakes it earlier.
    pub poll_interval: Duration,
    /// Used when [`JobOptions::with_max_attempts`] is not set.
    pub default_max_attempts: u16,
    /// Used when [`JobOptions::with_retry_delay`] is not set.
    pub default_retry_delay: TimeDelta,
    /// Cleans up finished jobs while the queue is started. Disabled by default.
    pub pruner: Option<PrunerConfig>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_millis(100),
            default_max_attempts: 3,
            default_retry_delay: TimeDelta::seconds(5),
            pruner: None,
        }
    }
}

impl QueueConfig {
    pub fn with_concurrency(self, concurrency: usize) -> Self {
        Self {
            concurrency,
            ..self
        }
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..self
        }
    }

    pub fn with_default_max_attempts(self, default_max_attempts: u16) -> Self {
        Self {
            default_max_attempts,
            ..self
        }
    }

    pub fn with_default_retry_delay(self, default_retry_delay: TimeDelta) -> Self {
        Self {
            default_retry_delay,
            ..self
        }
    }

    /// Periodically remove finished jobs while the queue is started.
    ///
    /// See [`pruner`] for details.
    pub fn with_job_pruner(self, config: PrunerConfig) -> Self {
        Self {
            pruner: Some(config),
            ..self
        }
    }
}

/// The job queue.
///
/// Cloning is cheap and every clone refers to the same queue.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

struct Inner {
    config: QueueConfig,
    store: JobStore,
    events: EventBus,
    registry: HandlerRegistry,
    wake: Arc<Notify>,
    tracker: TaskTracker,
    background: Mutex<Option<Background>>,
}

struct Background {
    cancellation_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("config", &self.inner.config)
            .field("handlers", &self.inner.registry)
            .field("jobs", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl JobQueue {
    pub fn new(mut config: QueueConfig) -> Self {
        if config.concurrency == 0 {
            tracing::warn!("A concurrency of 0 would never run a job, using 1 instead");
            config.concurrency = 1;
        }
        Self {
            inner: Arc::new(Inner {
                config,
                store: Default::default(),
                events: Default::default(),
                registry: Default::default(),
                wake: Default::default(),
                tracker: TaskTracker::new(),
                background: Default::default(),
            }),
        }
    }

    /// Enqueue a job, returning the new record.
    ///
    /// If [`JobOptions::unique`] names a key held by a pending or running job, that job is
    /// returned unchanged and nothing is enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::InvalidOptions`] if `max_attempts` is zero or a delay is
    /// negative.
    pub fn add(
        &self,
        job_type: impl Into<String>,
        payload: Value,
        options: JobOptions,
    ) -> Result<Job, JobQueueError> {
        let job_type = job_type.into();
        match self
            .inner
            .store
            .insert(job_type, payload, options, &self.inner.config)?
        {
            Inserted::New(job) => {
                tracing::debug!(job_id = %job.id, job_type = %job.job_type, "Added job {}", job.id);
                self.inner
                    .events
                    .emit(JobEvent::new(JobEventKind::Added, job.clone()));
                self.inner.wake.notify_one();
                Ok(job)
            }
            Inserted::Existing(job) => {
                tracing::debug!(job_id = %job.id, "Job {} already holds the unique key", job.id);
                Ok(job)
            }
        }
    }

    pub fn get_job(&self, id: JobId) -> Option<Job> {
        self.inner.store.get(id)
    }

    /// Jobs with the given status, in insertion order.
    pub fn get_jobs_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.inner.store.filter(|job| job.status == status)
    }

    /// Jobs of the given type, in insertion order.
    pub fn get_jobs_by_type(&self, job_type: &str) -> Vec<Job> {
        self.inner.store.filter(|job| job.job_type == job_type)
    }

    /// Every job, in insertion order.
    pub fn jobs(&self) -> Vec<Job> {
        self.inner.store.filter(|_| true)
    }

    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind a handler to a job type, replacing any existing one.
    pub fn register(&self, job_type: impl Into<String>, handler: impl JobHandler) {
        self.inner
            .registry
            .register(job_type.into(), Arc::new(handler));
    }

    /// Returns whether a handler was bound to the job type.
    pub fn unregister(&self, job_type: &str) -> bool {
        self.inner.registry.unregister(job_type)
    }

    /// Start dispatching jobs. Calling this while already started has no effect.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut background = self.lock_background();
        if background.is_some() {
            return;
        }

        tracing::debug!("Starting the job queue");
        let cancellation_token = CancellationToken::new();
        let runner = JobRunner::new(
            self.inner.store.clone(),
            self.inner.events.clone(),
            self.inner.wake.clone(),
        );
        let mut handles = vec![Scheduler::new(
            &self.inner.config,
            self.inner.store.clone(),
            self.inner.events.clone(),
            self.inner.registry.clone(),
            runner,
            self.inner.wake.clone(),
            self.inner.tracker.clone(),
        )
        .spawn(cancellation_token.child_token())];
        if let Some(config) = &self.inner.config.pruner {
            handles.push(
                PrunerRunner::new(self.inner.store.clone(), config.clone())
                    .spawn(cancellation_token.child_token()),
            );
        }

        *background = Some(Background {
            cancellation_token,
            handles,
        });
    }

    /// Stop dispatching jobs. Attempts already running continue to completion.
    ///
    /// Calling this while stopped has no effect.
    pub fn stop(&self) {
        if let Some(background) = self.lock_background().take() {
            tracing::debug!("Stopping the job queue");
            background.cancellation_token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_background().is_some()
    }

    /// Stop dispatching jobs and wait for every running attempt to resolve.
    ///
    /// The queue can be started again afterwards.
    pub async fn shutdown(&self) -> Result<(), JobQueueError> {
        tracing::debug!("Shutting down the job queue");
        let background = self.lock_background().take();
        if let Some(background) = background {
            background.cancellation_token.cancel();
            for handle in background.handles {
                handle
                    .await
                    .map_err(|_| JobQueueError::GracefulShutdownFailed)?;
            }
        }

        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
        Ok(())
    }

    /// Cancel a job.
    ///
    /// A pending job is cancelled immediately. For a running job the cancellation flag on its
    /// [`JobContext`] is set and the handler decides when to stop. Returns `false` for jobs
    /// that are already finished or unknown.
    pub fn cancel(&self, id: JobId) -> bool {
        match self.inner.store.cancel(id) {
            Cancellation::Cancelled(job) => {
                tracing::debug!(job_id = %id, "Cancelled job {id}");
                self.inner
                    .events
                    .emit(JobEvent::new(JobEventKind::Cancelled, job));
                true
            }
            Cancellation::Requested => {
                tracing::debug!(job_id = %id, "Requested cancellation of running job {id}");
                true
            }
            Cancellation::Rejected => false,
        }
    }

    /// Move a failed or cancelled job back to pending with its attempts reset.
    ///
    /// Returns `false` for jobs in any other status, or when another live job has taken the
    /// job's unique key in the meantime.
    pub fn retry(&self, id: JobId) -> bool {
        match self.inner.store.rerun(id) {
            Some(_) => {
                tracing::debug!(job_id = %id, "Retrying job {id}");
                self.inner.wake.notify_one();
                true
            }
            None => false,
        }
    }

    /// Returns whether the job existed.
    ///
    /// Removing a running job also sets its cancellation flag; the outcome of its attempt is
    /// discarded.
    pub fn remove(&self, id: JobId) -> bool {
        self.inner.store.remove(id).is_some()
    }

    /// Remove every job, or only those with the given status, returning how many were removed.
    pub fn clear(&self, status: Option<JobStatus>) -> usize {
        self.inner.store.clear(status)
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.store.stats()
    }

    /// Register a listener for one kind of event.
    ///
    /// Listeners run synchronously, after the transition is recorded. A panicking listener is
    /// logged and does not affect the queue or other listeners.
    ///
    /// Events raised on one thread arrive in the order their transitions happened. Events raised
    /// concurrently are not ordered: on a multi-threaded runtime a scheduler tick may report
    /// `job:started` before the thread that called [`JobQueue::add`] has delivered `job:added`.
    pub fn on<F>(&self, kind: JobEventKind, listener: F) -> Subscription
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    /// Register a listener for every kind of event.
    ///
    /// Ordering is the same as for [`JobQueue::on`].
    pub fn on_any<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.inner.events.on_any(listener)
    }

    /// A stream of events of one kind. Dropping the stream unsubscribes.
    pub fn subscribe(&self, kind: JobEventKind) -> impl Stream<Item = JobEvent> + Send {
        self.inner.events.subscribe(kind)
    }

    fn lock_background(&self) -> std::sync::MutexGuard<'_, Option<Background>> {
        self.inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobQueueError {
    #[error("Invalid job options: {0}")]
    InvalidOptions(&'static str),
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
    #[error("Failed to gracefully shut down")]
    GracefulShutdownFailed,
}
