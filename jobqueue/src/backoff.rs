//! Strategies for spacing out retries of failed jobs.
//!
//! Every strategy scales the job's [`crate::Job::retry_delay`]:
//!
//! 1. Constant (the default): always wait `retry_delay`
//! 2. Linear: wait `retry_delay * attempt`
//! 3. Exponential: wait `retry_delay * 2^(attempt - 1)`
//!
//! each of which can optionally be capped with [`Backoff::with_max`] and randomised with
//! [`Backoff::with_jitter`].
//!
//! All of the constructors and configuration functions are `const`.
//!
//! # Example
//!
//! ```
//! # use jobqueue::prelude::*;
//! # use chrono::TimeDelta;
//! let backoff = Backoff::linear()
//!     .with_max(TimeDelta::seconds(60))
//!     .with_jitter(Jitter::Absolute(TimeDelta::seconds(10)));
//!
//! let base = TimeDelta::seconds(20);
//! assert!(backoff.delay(base, 1) >= TimeDelta::seconds(10));
//! assert!(backoff.delay(base, 1) <= TimeDelta::seconds(30));
//! assert!(backoff.delay(base, 2) >= TimeDelta::seconds(30));
//! assert!(backoff.delay(base, 2) <= TimeDelta::seconds(50));
//! // Note the max here is the max plus max jitter
//! assert!(backoff.delay(base, 10) >= TimeDelta::seconds(50));
//! assert!(backoff.delay(base, 10) <= TimeDelta::seconds(70));
//! ```
use chrono::TimeDelta;
use rand::Rng;

/// How the delay grows with each attempt.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    #[default]
    Constant,
    Linear,
    Exponential,
}

/// A random jitter to be applied to a given backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// A random jitter to be added to the backoff in the range `-delta =< jitter =< delta`.
    Absolute(TimeDelta),
    /// A random jitter to be added as a proportion of the current backoff.
    Relative(f64),
}

impl Jitter {
    fn apply_jitter(&self, value: TimeDelta) -> TimeDelta {
        let milliseconds = match self {
            Self::Absolute(delta) => delta.num_milliseconds().abs(),
            Self::Relative(ratio) => (value.num_milliseconds() as f64 * ratio).round().abs() as i64,
        };
        let rand_jitter = rand::thread_rng().gen_range(-milliseconds..=milliseconds);
        value
            .checked_add(&TimeDelta::milliseconds(rand_jitter))
            .unwrap_or(value)
    }
}

/// The retry delay strategy of a job.
///
/// # Example
///
/// ```
/// # use jobqueue::prelude::*;
/// # use chrono::TimeDelta;
/// let backoff = Backoff::exponential().with_max(TimeDelta::seconds(30));
/// let base = TimeDelta::seconds(2);
///
/// assert_eq!(backoff.delay(base, 1), TimeDelta::seconds(2));
/// assert_eq!(backoff.delay(base, 2), TimeDelta::seconds(4));
/// assert_eq!(backoff.delay(base, 3), TimeDelta::seconds(8));
/// assert_eq!(backoff.delay(base, 4), TimeDelta::seconds(16));
/// assert_eq!(backoff.delay(base, 5), TimeDelta::seconds(30));
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Backoff {
    growth: Growth,
    max: Option<TimeDelta>,
    jitter: Option<Jitter>,
}

impl Backoff {
    pub const fn constant() -> Self {
        Self::new(Growth::Constant)
    }

    pub const fn linear() -> Self {
        Self::new(Growth::Linear)
    }

    pub const fn exponential() -> Self {
        Self::new(Growth::Exponential)
    }

    const fn new(growth: Growth) -> Self {
        Self {
            growth,
            max: None,
            jitter: None,
        }
    }

    /// Cap the delay before jitter is applied.
    pub const fn with_max(self, max: TimeDelta) -> Self {
        Self {
            max: Some(max),
            ..self
        }
    }

    pub const fn with_jitter(self, jitter: Jitter) -> Self {
        Self {
            jitter: Some(jitter),
            ..self
        }
    }

    pub fn growth(&self) -> Growth {
        self.growth
    }

    /// The delay to wait after the given (1-based) attempt failed.
    ///
    /// Never negative.
    pub fn delay(&self, base: TimeDelta, attempt: u16) -> TimeDelta {
        let base = base.num_milliseconds().max(0);
        let attempt = i64::from(attempt.max(1));
        let mut milliseconds = match self.growth {
            Growth::Constant => base,
            Growth::Linear => base.saturating_mul(attempt),
            Growth::Exponential => {
                base.saturating_mul(2_i64.saturating_pow((attempt - 1) as u32))
            }
        };
        if let Some(max) = self.max {
            milliseconds = milliseconds.min(max.num_milliseconds().max(0));
        }
        let delay = TimeDelta::try_milliseconds(milliseconds).unwrap_or(TimeDelta::MAX);
        match self.jitter {
            Some(jitter) => jitter.apply_jitter(delay).max(TimeDelta::zero()),
            None => delay,
        }
    }
}
