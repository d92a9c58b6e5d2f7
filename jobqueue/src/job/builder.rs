use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;

use crate::{backoff::Backoff, JobQueueError, QueueConfig};

use super::{Job, JobId, JobStatus, Priority, CORRELATION_ID_KEY, TAGS_KEY, USER_KEY};

/// The options accepted by [`crate::JobQueue::add`].
///
/// Anything left unset falls back to the defaults of the queue's [`QueueConfig`].
///
/// # Example
///
/// ```
/// # use jobqueue::prelude::*;
/// # use chrono::TimeDelta;
/// let options = JobOptions::default()
///     .with_priority(Priority::High)
///     .with_max_attempts(5)
///     .with_retry_delay(TimeDelta::seconds(10))
///     .with_backoff(Backoff::exponential().with_max(TimeDelta::minutes(5)))
///     .schedule_in(TimeDelta::minutes(1))
///     .unique("welcome-email:42")
///     .with_correlation_id("req-1234")
///     .add_tag("onboarding");
/// ```
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    priority: Priority,
    max_attempts: Option<u16>,
    retry_delay: Option<TimeDelta>,
    backoff: Backoff,
    delay: Option<TimeDelta>,
    scheduled_at: Option<DateTime<Utc>>,
    unique_key: Option<String>,
    metadata: HashMap<String, Value>,
}

impl JobOptions {
    pub fn with_priority(self, priority: Priority) -> Self {
        Self { priority, ..self }
    }

    pub fn with_max_attempts(self, max_attempts: u16) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..self
        }
    }

    pub fn with_retry_delay(self, retry_delay: TimeDelta) -> Self {
        Self {
            retry_delay: Some(retry_delay),
            ..self
        }
    }

    pub fn with_backoff(self, backoff: Backoff) -> Self {
        Self { backoff, ..self }
    }

    /// Delay the first dispatch of the job by the given duration.
    ///
    /// Ignored when [`JobOptions::schedule_at`] is also set.
    pub fn schedule_in(self, delay: TimeDelta) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }

    pub fn schedule_at(self, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at: Some(scheduled_at),
            ..self
        }
    }

    /// At most one pending or running job can exist per unique key.
    ///
    /// Adding a job whose key is already held by a live job returns the live job untouched.
    pub fn unique(self, key: impl Into<String>) -> Self {
        Self {
            unique_key: Some(key.into()),
            ..self
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_correlation_id(self, correlation_id: impl Into<String>) -> Self {
        self.with_metadata(CORRELATION_ID_KEY, Value::String(correlation_id.into()))
    }

    pub fn with_user(self, user_id: impl Into<String>) -> Self {
        self.with_metadata(USER_KEY, Value::String(user_id.into()))
    }

    pub fn add_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = Value::String(tag.into());
        match self.metadata.get_mut(TAGS_KEY) {
            Some(Value::Array(tags)) => tags.push(tag),
            _ => {
                self.metadata
                    .insert(TAGS_KEY.to_owned(), Value::Array(vec![tag]));
            }
        }
        self
    }

    pub fn with_tags(self, tags: Vec<impl Into<String>>) -> Self {
        let tags = tags.into_iter().map(|tag| Value::String(tag.into()));
        self.with_metadata(TAGS_KEY, Value::Array(tags.collect()))
    }

    pub(crate) fn into_job(
        self,
        id: JobId,
        job_type: String,
        payload: Value,
        config: &QueueConfig,
        now: DateTime<Utc>,
    ) -> Result<Job, JobQueueError> {
        let max_attempts = self.max_attempts.unwrap_or(config.default_max_attempts);
        if max_attempts == 0 {
            return Err(JobQueueError::InvalidOptions(
                "max_attempts must be at least 1",
            ));
        }
        let retry_delay = self.retry_delay.unwrap_or(config.default_retry_delay);
        if retry_delay < TimeDelta::zero() {
            return Err(JobQueueError::InvalidOptions(
                "retry_delay must not be negative",
            ));
        }
        let scheduled_at = match (self.scheduled_at, self.delay) {
            (Some(scheduled_at), _) => scheduled_at,
            (None, Some(delay)) if delay < TimeDelta::zero() => {
                return Err(JobQueueError::InvalidOptions("delay must not be negative"))
            }
            (None, Some(delay)) => now
                .checked_add_signed(delay)
                .ok_or(JobQueueError::InvalidOptions("delay is too large"))?,
            (None, None) => now,
        };

        Ok(Job {
            id,
            job_type,
            payload,
            status: JobStatus::Pending,
            priority: self.priority,
            attempts: 0,
            max_attempts,
            retry_delay,
            backoff: self.backoff,
            scheduled_at,
            unique_key: self.unique_key,
            metadata: self.metadata,
            progress: 0,
            result: None,
            error: None,
            errors: vec![],
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
        })
    }
}
