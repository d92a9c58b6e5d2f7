//! The handle given to a handler for a single attempt.
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::{
    events::{EventBus, JobEvent, JobEventKind},
    handler::HandlerError,
    job::{Job, JobId},
    store::JobStore,
};

/// Passed to [`crate::JobHandler::handle`] once per attempt.
///
/// Exposes the job as it was when the attempt started, progress reporting, and the cooperative
/// cancellation flag set by [`crate::JobQueue::cancel`].
#[derive(Clone)]
pub struct JobContext {
    job: Job,
    store: JobStore,
    events: EventBus,
    cancellation: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(
        job: Job,
        store: JobStore,
        events: EventBus,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            job,
            store,
            events,
            cancellation,
        }
    }

    /// The job as it was when this attempt started.
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn id(&self) -> JobId {
        self.job.id
    }

    /// The current attempt, starting at 1.
    pub fn attempt(&self) -> u16 {
        self.job.attempts
    }

    /// Deserialize the job payload.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_value(self.job.payload.clone())?)
    }

    /// Report progress, clamped to `0..=100`. The last update wins.
    ///
    /// Emits `job:progress` with the updated job. Has no effect once the job is no longer
    /// running, e.g. after it was removed from the queue.
    pub fn update_progress(&self, progress: i64) {
        let progress = progress.clamp(0, 100) as u8;
        if let Some(job) = self.store.update_progress(self.job.id, progress) {
            self.events.emit(JobEvent::new(JobEventKind::Progress, job));
        }
    }

    /// Whether [`crate::JobQueue::cancel`] was called while this attempt was running.
    ///
    /// Cancellation is cooperative: the queue never interrupts a handler, so long running
    /// handlers should check this periodically and return [`HandlerError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once cancellation has been requested. Useful with `tokio::select!`.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Returns [`HandlerError::Cancelled`] if cancellation has been requested, for use with `?`.
    pub fn ensure_not_cancelled(&self) -> Result<(), HandlerError> {
        if self.is_cancelled() {
            Err(HandlerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job", &self.job)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
