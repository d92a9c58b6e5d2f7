use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    events::{EventBus, JobEvent, JobEventKind},
    handler::HandlerRegistry,
    job::runner::JobRunner,
    store::{Dispatch, JobStore},
    QueueConfig,
};

/// Dispatches eligible jobs to their handlers.
///
/// Runs on every poll interval, whenever a job is added, retried or finishes, and when the
/// earliest scheduled job becomes due.
pub(crate) struct Scheduler {
    store: JobStore,
    events: EventBus,
    registry: HandlerRegistry,
    runner: JobRunner,
    concurrency: usize,
    poll_interval: Duration,
    wake: Arc<Notify>,
    tracker: TaskTracker,
}

impl Scheduler {
    pub(crate) fn new(
        config: &QueueConfig,
        store: JobStore,
        events: EventBus,
        registry: HandlerRegistry,
        runner: JobRunner,
        wake: Arc<Notify>,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            store,
            events,
            registry,
            runner,
            concurrency: config.concurrency,
            poll_interval: config.poll_interval,
            wake,
            tracker,
        }
    }

    pub(crate) fn spawn(self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!(concurrency = self.concurrency, "Starting the job scheduler");
            loop {
                tokio::select! {
                    biased;
                    _ = cancellation_token.cancelled() => break,
                    _ = self.wake.notified() => {},
                    _ = tokio::time::sleep(self.next_tick_in()) => {},
                }
                self.tick();
            }
            tracing::debug!("Shutting down the job scheduler");
        })
    }

    fn next_tick_in(&self) -> Duration {
        self.store
            .next_scheduled_at()
            .and_then(|scheduled_at| (scheduled_at - Utc::now()).to_std().ok())
            .map_or(self.poll_interval, |until| until.min(self.poll_interval))
    }

    fn tick(&self) {
        let dispatches = self
            .store
            .claim_ready(self.concurrency, Utc::now(), |job_type| {
                self.registry.get(job_type)
            });

        for dispatch in dispatches {
            match dispatch {
                Dispatch::Run {
                    job,
                    handler,
                    cancellation,
                } => {
                    self.events
                        .emit(JobEvent::new(JobEventKind::Started, job.clone()));
                    let runner = self.runner.clone();
                    self.tracker.spawn(async move {
                        runner.execute_job(job, handler, cancellation).await;
                    });
                }
                Dispatch::MissingHandler(job) => {
                    tracing::error!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        "No handler registered for job {} of type {}",
                        job.id,
                        job.job_type,
                    );
                    self.events.emit(JobEvent::new(JobEventKind::Failed, job));
                }
            }
        }
    }
}
