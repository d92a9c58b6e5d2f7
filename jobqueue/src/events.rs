//! Synchronous publish/subscribe for job lifecycle events.
//!
//! Listeners are invoked in registration order on the thread that triggered the transition,
//! before the triggering call returns. A panicking listener is logged and skipped; it never
//! prevents the remaining listeners from running and never reaches the scheduler.
//!
//! Events are emitted after the job table lock is released. Transitions made by different
//! threads can therefore be observed out of order, e.g. `job:started` from the scheduler before
//! `job:added` from the caller of `add`. Events raised on a single thread keep their order.
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    str::FromStr,
    sync::{Arc, PoisonError, RwLock, Weak},
};

use futures::Stream;
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{job::Job, JobQueueError};

/// The kinds of events emitted by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobEventKind {
    #[serde(rename = "job:added")]
    Added,
    #[serde(rename = "job:started")]
    Started,
    #[serde(rename = "job:completed")]
    Completed,
    #[serde(rename = "job:failed")]
    Failed,
    #[serde(rename = "job:cancelled")]
    Cancelled,
    #[serde(rename = "job:progress")]
    Progress,
}

impl JobEventKind {
    pub const ALL: [JobEventKind; 6] = [
        Self::Added,
        Self::Started,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Progress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "job:added",
            Self::Started => "job:started",
            Self::Completed => "job:completed",
            Self::Failed => "job:failed",
            Self::Cancelled => "job:cancelled",
            Self::Progress => "job:progress",
        }
    }
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobEventKind {
    type Err = JobQueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| JobQueueError::UnknownEvent(s.to_owned()))
    }
}

/// A lifecycle transition together with the job as it was right after the transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub kind: JobEventKind,
    pub job: Job,
}

impl JobEvent {
    pub(crate) fn new(kind: JobEventKind, job: Job) -> Self {
        Self { kind, job }
    }
}

type Listener = Arc<dyn Fn(&JobEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_kind: FxHashMap<JobEventKind, Vec<(ListenerId, Listener)>>,
}

impl Listeners {
    fn insert(&mut self, kinds: &[JobEventKind], listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        for kind in kinds {
            self.by_kind
                .entry(*kind)
                .or_default()
                .push((id, listener.clone()));
        }
        id
    }

    fn remove(&mut self, id: ListenerId) {
        self.by_kind
            .values_mut()
            .for_each(|listeners| listeners.retain(|(listener_id, _)| *listener_id != id));
    }
}

#[derive(Clone, Default)]
pub(crate) struct EventBus {
    listeners: Arc<RwLock<Listeners>>,
}

impl EventBus {
    pub(crate) fn on<F>(&self, kind: JobEventKind, listener: F) -> Subscription
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.listen(&[kind], Arc::new(listener))
    }

    pub(crate) fn on_any<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.listen(&JobEventKind::ALL, Arc::new(listener))
    }

    fn listen(&self, kinds: &[JobEventKind], listener: Listener) -> Subscription {
        let id = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kinds, listener);
        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    pub(crate) fn subscribe(&self, kind: JobEventKind) -> impl Stream<Item = JobEvent> + Send {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let guard = self
            .on(kind, move |event| {
                let _ = sender.send(event.clone());
            })
            .unsubscribe_on_drop();
        async_stream::stream! {
            let _guard = guard;
            while let Some(event) = receiver.recv().await {
                yield event;
            }
        }
    }

    pub(crate) fn emit(&self, event: JobEvent) {
        // Listeners run without the lock held so they can subscribe or unsubscribe.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_kind
            .get(&event.kind)
            .map(|listeners| listeners.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                tracing::error!(
                    job_id = %event.job.id,
                    event = %event.kind,
                    "Listener for {} panicked: {message}",
                    event.kind
                );
            }
        }
    }
}

/// Returned when registering a listener; removes exactly that listener when
/// [`Subscription::unsubscribe`] is called.
///
/// Dropping a [`Subscription`] leaves the listener registered.
#[derive(Debug, Clone)]
#[must_use = "dropping a subscription leaves the listener registered, bind it to unsubscribe later"]
pub struct Subscription {
    listeners: Weak<RwLock<Listeners>>,
    id: ListenerId,
}

impl Subscription {
    /// Remove the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(self.id);
        }
    }

    /// Convert into a guard which unsubscribes when dropped.
    pub fn unsubscribe_on_drop(self) -> SubscriptionGuard {
        SubscriptionGuard(self)
    }
}

/// Unsubscribes the wrapped [`Subscription`] on drop.
#[derive(Debug)]
pub struct SubscriptionGuard(Subscription);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}
