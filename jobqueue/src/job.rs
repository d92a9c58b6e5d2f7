//! The job record and the types describing its lifecycle.
use std::{collections::HashMap, fmt::Display};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backoff::Backoff;

pub mod builder;
pub(crate) mod runner;

pub(crate) const CORRELATION_ID_KEY: &str = "correlation_id";
pub(crate) const TAGS_KEY: &str = "tags";
pub(crate) const USER_KEY: &str = "user_id";

/// Identifier of a job, unique for the lifetime of a [`crate::JobQueue`].
///
/// Identifiers are handed out in increasing order, so comparing two ids tells you which job was
/// added first.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<JobId> for u64 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

/// A single unit of work owned by the queue.
///
/// Instances handed out by the queue are snapshots: mutating one does not affect the job held by
/// the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Selects the handler registered via [`crate::JobQueue::register`].
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: Value,
    pub status: JobStatus,
    pub priority: Priority,
    /// The number of attempts made so far, including one currently running.
    pub attempts: u16,
    pub max_attempts: u16,
    /// The base delay before retrying a failed attempt.
    #[serde(with = "milliseconds")]
    pub retry_delay: TimeDelta,
    /// How [`Job::retry_delay`] grows with the number of attempts.
    #[serde(skip)]
    pub backoff: Backoff,
    /// The earliest time this job may be dispatched.
    pub scheduled_at: DateTime<Utc>,
    pub unique_key: Option<String>,
    pub metadata: HashMap<String, Value>,
    /// Progress reported by the handler, always within `0..=100`.
    pub progress: u8,
    /// The value returned by the handler; only set once the job is [`JobStatus::Completed`].
    pub result: Option<Value>,
    /// The final error message; only set once the job is [`JobStatus::Failed`].
    pub error: Option<String>,
    /// Every failed attempt, oldest first.
    pub errors: Vec<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// The correlation id stored in the job's metadata, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(CORRELATION_ID_KEY).and_then(Value::as_str)
    }

    /// The user on whose behalf the job was added, if any.
    pub fn user_id(&self) -> Option<&str> {
        self.metadata.get(USER_KEY).and_then(Value::as_str)
    }

    /// The tags stored in the job's metadata.
    pub fn tags(&self) -> Vec<&str> {
        self.metadata
            .get(TAGS_KEY)
            .and_then(Value::as_array)
            .map(|tags| tags.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// The lifecycle state of a [`Job`].
///
/// ```text
/// Pending -> Running -> Completed
///    |          |-----> Pending (retry after the backoff delay)
///    |          |-----> Failed
///    |          `-----> Cancelled
///    `----------------> Cancelled
/// ```
///
/// [`JobStatus::Failed`] and [`JobStatus::Cancelled`] can be moved back to
/// [`JobStatus::Pending`] via [`crate::JobQueue::retry`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Whether the status is one the scheduler will never move the job out of.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch priority. Eligible jobs are dispatched highest priority first and, within the same
/// priority, in the order they were added.
#[derive(
    Debug, Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// A record of a single failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub attempt: u16,
    pub error_type: ErrorType,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The handler panicked.
    Panic,
    /// No handler was registered for the job type.
    MissingHandler,
    /// The handler returned an error.
    Handler,
}

mod milliseconds {
    use chrono::TimeDelta;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &TimeDelta, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(value.num_milliseconds())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<TimeDelta, D::Error> {
        let millis = i64::deserialize(d)?;
        TimeDelta::try_milliseconds(millis)
            .ok_or_else(|| D::Error::custom(format!("duration out of range: {millis}ms")))
    }
}
