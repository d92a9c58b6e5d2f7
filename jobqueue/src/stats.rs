//! Aggregate counters describing the queue's throughput.
use serde::{Deserialize, Serialize};

/// A point in time view of the queue's statistics returned by [`crate::JobQueue::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs created by [`crate::JobQueue::add`]; deduplicated adds are not counted.
    pub total_added: u64,
    pub total_completed: u64,
    /// Jobs that reached the terminal failed state.
    pub total_failed: u64,
    /// Jobs currently running.
    pub active: usize,
    /// Jobs currently waiting to be dispatched, including those scheduled in the future.
    pub pending: usize,
    /// Percentage of finished jobs that completed, `0` when nothing has finished yet.
    pub success_rate: f64,
}

/// Lifetime counters, updated alongside the job table.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub(crate) added: u64,
    pub(crate) completed: u64,
    pub(crate) failed: u64,
}

impl Counters {
    pub(crate) fn snapshot(&self, active: usize, pending: usize) -> QueueStats {
        QueueStats {
            total_added: self.added,
            total_completed: self.completed,
            total_failed: self.failed,
            active,
            pending,
            success_rate: success_rate(self.completed, self.failed),
        }
    }
}

fn success_rate(completed: u64, failed: u64) -> f64 {
    match completed + failed {
        0 => 0.0,
        finished => completed as f64 / finished as f64 * 100.0,
    }
}
