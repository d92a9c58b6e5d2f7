//! The purpose of this module is to alleviate the need to import many of the [`crate`] types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use jobqueue::prelude::*;
//! ```
pub use crate::backoff::{Backoff, Jitter};
pub use crate::context::JobContext;
pub use crate::events::{JobEvent, JobEventKind, Subscription};
pub use crate::handler::{HandlerError, HandlerResult, JobHandler};
pub use crate::job::builder::JobOptions;
pub use crate::job::{Job, JobId, JobStatus, Priority};
pub use crate::pruner::{Pruner, PrunerConfig};
pub use crate::stats::QueueStats;
pub use crate::{JobQueue, JobQueueError, QueueConfig};
