//! The API for configuring the job pruner.
//!
//! Finished jobs stay in the queue until they are removed. For long running processes it is
//! useful to clean them up periodically instead of calling [`crate::JobQueue::clear`] by hand.
//!
//! When constructing [`PrunerConfig`] a [`cron::Schedule`] is provided to specify when the pruner
//! should run. The pruner runs while the queue is started.
//!
//! [`PrunerConfig`] can have a number of individual [`Pruner`]s configured, each one specific for
//! cleaning up jobs matching specific criteria. For example, it is possible to configure the
//! pruner to achieve all of the following:
//!
//! - keep only the last 10 completed `report` jobs,
//! - remove completed jobs of every other type once they are a day old,
//! - remove cancelled jobs after a week, and
//! - keep all failed jobs indefinitely.
//!
//! Only finished jobs are ever pruned; pruners for pending or running jobs are ignored.
//!
//! # Example
//!
//! ```
//! # use jobqueue::prelude::*;
//! # use std::str::FromStr;
//! # use chrono::TimeDelta;
//! let config = PrunerConfig::new(cron::Schedule::from_str("0 0 * * * *").unwrap())
//!     .with_pruner(Pruner::max_length(10, JobStatus::Completed).only("report"))
//!     .with_pruner(Pruner::max_age(TimeDelta::days(1), JobStatus::Completed).except("report"))
//!     .with_pruner(Pruner::max_age(TimeDelta::days(7), JobStatus::Cancelled));
//! ```
use chrono::TimeDelta;

pub(crate) mod runner;

use crate::job::{Job, JobStatus};

/// Fine grained configuration for how finished jobs should be cleaned up.
///
/// Once constructed, [`PrunerConfig`] should be passed to
/// [`crate::QueueConfig::with_job_pruner`].
#[derive(Debug, Clone)]
pub struct PrunerConfig {
    pub(crate) schedule: cron::Schedule,
    pub(crate) pruners: Vec<PruneSpec>,
}

impl PrunerConfig {
    /// Construct a new instance of [`PrunerConfig`] scheduled to run on the provided cron
    /// schedule.
    pub fn new(schedule: cron::Schedule) -> Self {
        Self {
            schedule,
            pruners: Default::default(),
        }
    }

    /// Add a single [`Pruner`] to the config.
    #[allow(private_bounds)]
    pub fn with_pruner<T>(mut self, pruner: Pruner<T>) -> Self
    where
        T: IntoSpec,
    {
        self.pruners.push(pruner.into());
        self
    }

    /// Add multiple [`Pruner`]s of a single type to the config.
    #[allow(private_bounds)]
    pub fn with_pruners<T>(mut self, pruners: impl IntoIterator<Item = Pruner<T>>) -> Self
    where
        T: IntoSpec,
    {
        self.pruners.extend(pruners.into_iter().map(Into::into));
        self
    }
}

/// A single pruner as stored in [`PrunerConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneSpec {
    /// The status of the jobs that should be affected by this pruner.
    pub status: JobStatus,
    /// The particular pruning strategy to apply, either max length or max age.
    pub prune_by: PruneBy,
    /// The job types affected by this pruner.
    pub job_types: Spec,
}

impl PruneSpec {
    pub(crate) fn matches(&self, job: &Job) -> bool {
        job.status == self.status
            && match &self.job_types {
                Spec::Except(types) => !types.contains(&job.job_type),
                Spec::Only(types) => types.contains(&job.job_type),
            }
    }
}

impl<T> From<Pruner<T>> for PruneSpec
where
    T: IntoSpec,
{
    fn from(value: Pruner<T>) -> Self {
        Self {
            status: value.status,
            prune_by: value.prune_by,
            job_types: value.job_types.into_spec(),
        }
    }
}

/// Configuration for a single pruner.
///
/// Pruners can either be configured to prune by the age of jobs constructed via
/// [`Pruner::max_age`] or the total number of jobs via [`Pruner::max_length`].
///
/// By default a pruner prunes jobs of every type. To only prune a specific set of job types use
/// [`Pruner::only`] followed by [`Pruner::and`]. Similarly, to prune all but a specific set of
/// job types, use [`Pruner::except`] followed by [`Pruner::and`].
///
/// # Example
///
/// ```
/// # use jobqueue::prelude::*;
/// # use chrono::TimeDelta;
/// let pruner = Pruner::max_length(200, JobStatus::Failed)
///     .only("email")
///     .and("sms");
/// ```
#[allow(private_bounds)]
pub struct Pruner<T>
where
    T: IntoSpec,
{
    status: JobStatus,
    prune_by: PruneBy,
    job_types: T,
}

impl Pruner<All> {
    /// Constructs a pruner that will prune jobs finished longer than `age` ago.
    pub const fn max_age(age: TimeDelta, status: JobStatus) -> Self {
        Self {
            status,
            prune_by: PruneBy::MaxAge(age),
            job_types: All,
        }
    }

    /// Constructs a pruner that will keep at most `length` matching jobs, pruning the oldest
    /// first.
    pub const fn max_length(length: usize, status: JobStatus) -> Self {
        Self {
            status,
            prune_by: PruneBy::MaxLength(length),
            job_types: All,
        }
    }

    /// Restrict this pruner to only prune jobs of the given type.
    pub fn only(self, job_type: impl Into<String>) -> Pruner<Only> {
        Pruner {
            status: self.status,
            prune_by: self.prune_by,
            job_types: Only(vec![job_type.into()]),
        }
    }

    /// Restrict this pruner to not prune jobs of the given type.
    pub fn except(self, job_type: impl Into<String>) -> Pruner<Except> {
        Pruner {
            status: self.status,
            prune_by: self.prune_by,
            job_types: Except(vec![job_type.into()]),
        }
    }
}

impl Pruner<Only> {
    /// Additionally prune jobs of the given type.
    pub fn and(mut self, job_type: impl Into<String>) -> Self {
        self.job_types.0.push(job_type.into());
        self
    }
}

impl Pruner<Except> {
    /// Add another job type to the exclusion list for this pruner.
    pub fn and(mut self, job_type: impl Into<String>) -> Self {
        self.job_types.0.push(job_type.into());
        self
    }
}

/// The strategy to prune by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneBy {
    /// Remove all matching jobs last updated longer ago than the given [`TimeDelta`].
    MaxAge(TimeDelta),
    /// Keep at most the given number of matching jobs, removing the oldest first.
    MaxLength(usize),
}

/// The job types a pruner applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Spec {
    /// Prune jobs of all types except those given.
    Except(Vec<String>),
    /// Prune jobs only of the types given.
    Only(Vec<String>),
}

trait IntoSpec {
    fn into_spec(self) -> Spec;
}
#[doc(hidden)]
pub struct All;
impl IntoSpec for All {
    fn into_spec(self) -> Spec {
        Spec::Except(Vec::new())
    }
}
#[doc(hidden)]
pub struct Except(Vec<String>);
impl IntoSpec for Except {
    fn into_spec(self) -> Spec {
        Spec::Except(self.0)
    }
}
#[doc(hidden)]
pub struct Only(Vec<String>);
impl IntoSpec for Only {
    fn into_spec(self) -> Spec {
        Spec::Only(self.0)
    }
}
