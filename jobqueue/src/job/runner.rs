use std::sync::Arc;

use tokio::{sync::Notify, task::JoinError};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Instrument};

use crate::{
    context::JobContext,
    events::{EventBus, JobEvent, JobEventKind},
    handler::{HandlerError, JobHandler},
    store::{AttemptFailure, JobStore},
};

use super::{ErrorType, Job, JobId};

/// Runs a single attempt of a job and records its outcome.
#[derive(Clone)]
pub(crate) struct JobRunner {
    store: JobStore,
    events: EventBus,
    wake: Arc<Notify>,
}

impl JobRunner {
    pub(crate) fn new(store: JobStore, events: EventBus, wake: Arc<Notify>) -> Self {
        Self {
            store,
            events,
            wake,
        }
    }

    #[instrument(skip_all, fields(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts))]
    pub(crate) async fn execute_job(
        &self,
        job: Job,
        handler: Arc<dyn JobHandler>,
        cancellation: CancellationToken,
    ) {
        let job_id = job.id;
        let ctx = JobContext::new(job, self.store.clone(), self.events.clone(), cancellation);

        tracing::debug!(%job_id, "Executing job {job_id}");
        let result = tokio::spawn(async move { handler.handle(ctx).await }.in_current_span()).await;

        match result {
            Ok(Ok(value)) => self.handle_job_complete(job_id, value),
            Ok(Err(HandlerError::Cancelled)) => self.handle_job_cancelled(job_id),
            Ok(Err(HandlerError::Failed(message))) => {
                self.handle_job_error(job_id, ErrorType::Handler, message)
            }
            Err(error) => self.handle_job_error(job_id, ErrorType::Panic, panic_message(error)),
        }

        // A slot has been freed.
        self.wake.notify_one();
    }

    fn handle_job_complete(&self, job_id: JobId, value: serde_json::Value) {
        match self.store.complete(job_id, value) {
            Some(job) => {
                tracing::debug!(%job_id, "Job complete {job_id}");
                self.events.emit(JobEvent::new(JobEventKind::Completed, job));
            }
            None => tracing::debug!(%job_id, "Job {job_id} completed after it was removed"),
        }
    }

    fn handle_job_cancelled(&self, job_id: JobId) {
        match self.store.cancel_running(job_id) {
            Some(job) => {
                tracing::debug!(%job_id, "Job {job_id} stopped after cancellation");
                self.events.emit(JobEvent::new(JobEventKind::Cancelled, job));
            }
            None => tracing::debug!(%job_id, "Job {job_id} cancelled after it was removed"),
        }
    }

    fn handle_job_error(&self, job_id: JobId, error_type: ErrorType, message: String) {
        match self.store.fail_attempt(job_id, error_type.clone(), message.clone()) {
            Some(AttemptFailure::Retrying(job)) => {
                let delay = job.scheduled_at - chrono::Utc::now();
                tracing::warn!(
                    %job_id,
                    ?error_type,
                    "Job {job_id} failed and will be retried in {delay}: {message}",
                );
            }
            Some(AttemptFailure::Failed(job)) => {
                tracing::error!(
                    %job_id,
                    ?error_type,
                    attempts = job.attempts,
                    "Job {job_id} failed and will not be retried: {message}",
                );
                self.events.emit(JobEvent::new(JobEventKind::Failed, job));
            }
            None => tracing::debug!(%job_id, "Job {job_id} failed after it was removed"),
        }
    }
}

fn panic_message(error: JoinError) -> String {
    let msg = error.to_string();
    match error.try_into_panic() {
        Ok(panic) => panic
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or(msg),
        Err(_) => msg,
    }
}
