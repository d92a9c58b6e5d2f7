//! The job table shared by the facade, the scheduler and running handlers.
//!
//! All mutations go through a single lock and every method returns owned snapshots, so no caller
//! can observe a partially updated job. The lock is never held while user code (handlers or
//! event listeners) runs.
use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use chrono::{DateTime, Utc};
use fxhash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    handler::JobHandler,
    job::{builder::JobOptions, ErrorType, Job, JobError, JobId, JobStatus},
    pruner::{PruneBy, PruneSpec},
    stats::{Counters, QueueStats},
    JobQueueError, QueueConfig,
};

/// The outcome of [`JobStore::insert`].
#[derive(Debug)]
pub(crate) enum Inserted {
    New(Job),
    /// A live job already holds the unique key.
    Existing(Job),
}

#[derive(Debug)]
pub(crate) enum Cancellation {
    /// A pending job moved straight to cancelled.
    Cancelled(Job),
    /// A running job had its cancellation token triggered.
    Requested,
    /// The job is terminal or unknown.
    Rejected,
}

/// A job selected by [`JobStore::claim_ready`].
pub(crate) enum Dispatch {
    Run {
        job: Job,
        handler: Arc<dyn JobHandler>,
        cancellation: CancellationToken,
    },
    /// No handler is registered; the job has already been failed.
    MissingHandler(Job),
}

/// The outcome of [`JobStore::fail_attempt`].
#[derive(Debug)]
pub(crate) enum AttemptFailure {
    /// The job went back to pending to be retried at [`Job::scheduled_at`].
    Retrying(Job),
    Failed(Job),
}

struct Entry {
    job: Job,
    /// Present while the job is running.
    cancellation: Option<CancellationToken>,
}

#[derive(Default)]
struct Table {
    // Ids increase monotonically so iteration order is insertion order.
    jobs: BTreeMap<JobId, Entry>,
    unique: FxHashMap<String, JobId>,
    /// Attempts whose handler has not resolved yet, including those of removed jobs.
    in_flight: FxHashSet<JobId>,
    next_id: u64,
    counters: Counters,
}

impl Table {
    fn live_holder(&self, key: &str) -> Option<JobId> {
        self.unique.get(key).copied().filter(|id| {
            self.jobs
                .get(id)
                .is_some_and(|entry| !entry.job.status.is_terminal())
        })
    }

    fn release_key(&mut self, job: &Job) {
        if let Some(key) = &job.unique_key {
            if self.unique.get(key) == Some(&job.id) {
                self.unique.remove(key);
            }
        }
    }

    fn count(&self, status: JobStatus) -> usize {
        self.jobs
            .values()
            .filter(|entry| entry.job.status == status)
            .count()
    }
}

#[derive(Clone, Default)]
pub(crate) struct JobStore {
    table: Arc<RwLock<Table>>,
}

impl JobStore {
    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(
        &self,
        job_type: String,
        payload: Value,
        options: JobOptions,
        config: &QueueConfig,
    ) -> Result<Inserted, JobQueueError> {
        let mut table = self.write();
        let id = JobId::from(table.next_id);
        let job = options.into_job(id, job_type, payload, config, Utc::now())?;
        if let Some(id) = job.unique_key.as_deref().and_then(|key| table.live_holder(key)) {
            if let Some(entry) = table.jobs.get(&id) {
                return Ok(Inserted::Existing(entry.job.clone()));
            }
        }

        table.next_id += 1;
        table.counters.added += 1;
        if let Some(key) = &job.unique_key {
            table.unique.insert(key.clone(), id);
        }
        table.jobs.insert(
            id,
            Entry {
                job: job.clone(),
                cancellation: None,
            },
        );
        Ok(Inserted::New(job))
    }

    pub(crate) fn get(&self, id: JobId) -> Option<Job> {
        self.read().jobs.get(&id).map(|entry| entry.job.clone())
    }

    pub(crate) fn filter(&self, predicate: impl Fn(&Job) -> bool) -> Vec<Job> {
        self.read()
            .jobs
            .values()
            .filter(|entry| predicate(&entry.job))
            .map(|entry| entry.job.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.read().jobs.len()
    }

    pub(crate) fn stats(&self) -> QueueStats {
        let table = self.read();
        table.counters.snapshot(
            table.count(JobStatus::Running),
            table.count(JobStatus::Pending),
        )
    }

    /// Mark up to `concurrency - in flight` eligible jobs as running, highest priority first and
    /// oldest first within a priority.
    ///
    /// A slot stays taken until the attempt's outcome is recorded, even if the job was removed in
    /// the meantime. Jobs without a handler are failed immediately and do not take up a slot.
    pub(crate) fn claim_ready(
        &self,
        concurrency: usize,
        now: DateTime<Utc>,
        resolve: impl Fn(&str) -> Option<Arc<dyn JobHandler>>,
    ) -> Vec<Dispatch> {
        let mut table = self.write();
        let mut slots = concurrency.saturating_sub(table.in_flight.len());
        if slots == 0 {
            return vec![];
        }

        let mut ready: Vec<_> = table
            .jobs
            .values()
            .filter(|entry| entry.job.status == JobStatus::Pending && entry.job.scheduled_at <= now)
            .map(|entry| (entry.job.priority, entry.job.id))
            .collect();
        ready.sort_by(|(a_priority, a_id), (b_priority, b_id)| {
            b_priority.cmp(a_priority).then(a_id.cmp(b_id))
        });

        let mut dispatches = Vec::new();
        for (_, id) in ready {
            if slots == 0 {
                break;
            }
            let Some(entry) = table.jobs.get_mut(&id) else {
                continue;
            };
            match resolve(&entry.job.job_type) {
                Some(handler) => {
                    let cancellation = CancellationToken::new();
                    entry.job.mark_running(now);
                    entry.cancellation = Some(cancellation.clone());
                    dispatches.push(Dispatch::Run {
                        job: entry.job.clone(),
                        handler,
                        cancellation,
                    });
                    table.in_flight.insert(id);
                    slots -= 1;
                }
                None => {
                    let message = format!("No handler registered for type: {}", entry.job.job_type);
                    entry.job.mark_failed(
                        JobError {
                            attempt: entry.job.attempts,
                            error_type: ErrorType::MissingHandler,
                            message,
                            recorded_at: now,
                        },
                        now,
                    );
                    let job = entry.job.clone();
                    table.counters.failed += 1;
                    table.release_key(&job);
                    dispatches.push(Dispatch::MissingHandler(job));
                }
            }
        }
        dispatches
    }

    /// The earliest time a pending job becomes eligible.
    pub(crate) fn next_scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.read()
            .jobs
            .values()
            .filter(|entry| entry.job.status == JobStatus::Pending)
            .map(|entry| entry.job.scheduled_at)
            .min()
    }

    /// Record progress of a running job, returning the updated job.
    pub(crate) fn update_progress(&self, id: JobId, progress: u8) -> Option<Job> {
        let mut table = self.write();
        let entry = table.jobs.get_mut(&id)?;
        if entry.job.status != JobStatus::Running {
            return None;
        }
        entry.job.progress = progress;
        entry.job.updated_at = Utc::now();
        Some(entry.job.clone())
    }

    pub(crate) fn complete(&self, id: JobId, result: Value) -> Option<Job> {
        let mut table = self.write();
        table.in_flight.remove(&id);
        let entry = table.jobs.get_mut(&id)?;
        if entry.job.status != JobStatus::Running {
            return None;
        }
        entry.job.mark_completed(result, Utc::now());
        entry.cancellation = None;
        let job = entry.job.clone();
        table.counters.completed += 1;
        table.release_key(&job);
        Some(job)
    }

    pub(crate) fn fail_attempt(
        &self,
        id: JobId,
        error_type: ErrorType,
        message: String,
    ) -> Option<AttemptFailure> {
        let now = Utc::now();
        let mut table = self.write();
        table.in_flight.remove(&id);
        let entry = table.jobs.get_mut(&id)?;
        if entry.job.status != JobStatus::Running {
            return None;
        }
        let error = JobError {
            attempt: entry.job.attempts,
            error_type,
            message,
            recorded_at: now,
        };
        entry.cancellation = None;

        if entry.job.is_final_attempt() {
            entry.job.mark_failed(error, now);
            let job = entry.job.clone();
            table.counters.failed += 1;
            table.release_key(&job);
            Some(AttemptFailure::Failed(job))
        } else {
            let delay = entry.job.backoff.delay(entry.job.retry_delay, entry.job.attempts);
            let scheduled_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
            entry.job.mark_retryable(scheduled_at, error, now);
            Some(AttemptFailure::Retrying(entry.job.clone()))
        }
    }

    /// Mark a running job as cancelled after its handler stopped in response to a cancellation.
    pub(crate) fn cancel_running(&self, id: JobId) -> Option<Job> {
        let mut table = self.write();
        table.in_flight.remove(&id);
        let entry = table.jobs.get_mut(&id)?;
        if entry.job.status != JobStatus::Running {
            return None;
        }
        entry.job.mark_cancelled(Utc::now());
        entry.cancellation = None;
        let job = entry.job.clone();
        table.release_key(&job);
        Some(job)
    }

    pub(crate) fn cancel(&self, id: JobId) -> Cancellation {
        let mut table = self.write();
        let Some(entry) = table.jobs.get_mut(&id) else {
            return Cancellation::Rejected;
        };
        match entry.job.status {
            JobStatus::Pending => {
                entry.job.mark_cancelled(Utc::now());
                let job = entry.job.clone();
                table.release_key(&job);
                Cancellation::Cancelled(job)
            }
            JobStatus::Running => {
                if let Some(token) = &entry.cancellation {
                    token.cancel();
                }
                Cancellation::Requested
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                Cancellation::Rejected
            }
        }
    }

    /// Move a failed or cancelled job back to pending with a fresh set of attempts.
    pub(crate) fn rerun(&self, id: JobId) -> Option<Job> {
        let mut table = self.write();
        let entry = table.jobs.get(&id)?;
        if !matches!(entry.job.status, JobStatus::Failed | JobStatus::Cancelled) {
            return None;
        }
        if let Some(key) = entry.job.unique_key.clone() {
            if table.live_holder(&key).is_some() {
                tracing::debug!(job_id = %id, %key, "Not rerunning {id}, unique key {key} is taken");
                return None;
            }
            table.unique.insert(key, id);
        }
        let entry = table.jobs.get_mut(&id)?;
        entry.job.mark_rerunnable(Utc::now());
        Some(entry.job.clone())
    }

    pub(crate) fn remove(&self, id: JobId) -> Option<Job> {
        let mut table = self.write();
        let entry = table.jobs.remove(&id)?;
        if let Some(token) = entry.cancellation {
            token.cancel();
        }
        table.release_key(&entry.job);
        Some(entry.job)
    }

    /// Remove every job, or every job with the given status, returning how many were removed.
    pub(crate) fn clear(&self, status: Option<JobStatus>) -> usize {
        let mut table = self.write();
        let removed: Vec<JobId> = table
            .jobs
            .values()
            .filter(|entry| status.map_or(true, |status| entry.job.status == status))
            .map(|entry| entry.job.id)
            .collect();
        for id in &removed {
            if let Some(entry) = table.jobs.remove(id) {
                if let Some(token) = entry.cancellation {
                    token.cancel();
                }
                table.release_key(&entry.job);
            }
        }
        removed.len()
    }

    /// Remove terminal jobs matching the pruner, returning how many were removed.
    pub(crate) fn prune(&self, spec: &PruneSpec) -> usize {
        if !spec.status.is_terminal() {
            tracing::warn!(status = %spec.status, "Refusing to prune {} jobs", spec.status);
            return 0;
        }
        let mut table = self.write();
        let matching: Vec<(JobId, DateTime<Utc>)> = table
            .jobs
            .values()
            .filter(|entry| spec.matches(&entry.job))
            .map(|entry| (entry.job.id, entry.job.updated_at))
            .collect();

        let removed: Vec<JobId> = match spec.prune_by {
            PruneBy::MaxAge(age) => {
                let cutoff = Utc::now() - age;
                matching
                    .into_iter()
                    .filter(|(_, updated_at)| *updated_at < cutoff)
                    .map(|(id, _)| id)
                    .collect()
            }
            PruneBy::MaxLength(length) => {
                let excess = matching.len().saturating_sub(length);
                matching.into_iter().take(excess).map(|(id, _)| id).collect()
            }
        };
        for id in &removed {
            table.jobs.remove(id);
        }
        removed.len()
    }
}

impl Job {
    fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.attempts += 1;
        self.progress = 0;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    fn mark_completed(&mut self, result: Value, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    fn mark_retryable(&mut self, scheduled_at: DateTime<Utc>, error: JobError, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.scheduled_at = scheduled_at;
        self.errors.push(error);
        self.updated_at = now;
    }

    fn mark_failed(&mut self, error: JobError, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.message.clone());
        self.errors.push(error);
        self.failed_at = Some(now);
        self.updated_at = now;
    }

    fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.updated_at = now;
    }

    fn mark_rerunnable(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.attempts = 0;
        self.progress = 0;
        self.error = None;
        self.result = None;
        self.scheduled_at = now;
        self.failed_at = None;
        self.cancelled_at = None;
        self.updated_at = now;
    }
}
