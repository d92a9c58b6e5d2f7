//! Handlers execute jobs of a given type.
//!
//! Any `async` function or closure taking a [`JobContext`] and returning a [`HandlerResult`] is a
//! handler:
//!
//! ```
//! # use jobqueue::prelude::*;
//! # use serde_json::json;
//! async fn send_email(ctx: JobContext) -> HandlerResult {
//!     let to: String = ctx.payload_as()?;
//!     ctx.update_progress(50);
//!     Ok(json!({ "sent_to": to }))
//! }
//!
//! let queue = JobQueue::default();
//! queue.register("email", send_email);
//! ```
//!
//! For handlers that carry state, implement [`JobHandler`] directly.
use std::{
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use fxhash::FxHashMap;
use serde_json::Value;

use crate::context::JobContext;

pub type HandlerResult = Result<Value, HandlerError>;

/// Executes a single attempt of a job.
///
/// Returning `Ok` completes the job with the returned value as its result. Returning
/// [`HandlerError::Failed`] or panicking fails the attempt, which is retried while the job has
/// attempts left. Returning [`HandlerError::Cancelled`] cancels the job.
///
/// The queue never interrupts a handler. Handlers that want to honour
/// [`crate::JobQueue::cancel`] must check [`JobContext::is_cancelled`] (or await
/// [`JobContext::cancelled`]) and return [`HandlerError::Cancelled`].
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: JobContext) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext) -> HandlerResult {
        (self)(ctx).await
    }
}

/// The ways an attempt can end unsuccessfully.
///
/// Any [`std::error::Error`] converts into [`HandlerError::Failed`], so `?` works inside
/// handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler observed a cancellation request and stopped.
    Cancelled,
    /// The attempt failed with the given message.
    Failed(String),
}

impl HandlerError {
    pub fn msg(message: impl std::fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(value: E) -> Self {
        Self::Failed(value.to_string())
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => f.write_str("Job was cancelled"),
            Self::Failed(message) => f.write_str(message),
        }
    }
}

/// Maps job types to their handlers.
#[derive(Clone, Default)]
pub(crate) struct HandlerRegistry {
    handlers: Arc<RwLock<FxHashMap<String, Arc<dyn JobHandler>>>>,
}

impl HandlerRegistry {
    pub(crate) fn register(&self, job_type: String, handler: Arc<dyn JobHandler>) {
        if self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_type.clone(), handler)
            .is_some()
        {
            tracing::debug!(%job_type, "Replaced handler for {job_type}");
        }
    }

    pub(crate) fn unregister(&self, job_type: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_type)
            .is_some()
    }

    pub(crate) fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_type)
            .cloned()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_set().entries(handlers.keys()).finish()
    }
}
