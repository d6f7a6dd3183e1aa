//! Listener interfaces exposed to collaborators.
//!
//! Every method has an empty default so implementors only override what they
//! observe. Callbacks run on whichever thread caused the event (producer,
//! worker or restore thread) and never while the store's data lock is held.

use chrono::{DateTime, Utc};

use crate::domain::{Descriptor, ExecTiming, RunOutcome};
use crate::observability::QueueCounts;

pub trait StoreListener: Send + Sync {
    fn on_restore_started(&self, _started_at: DateTime<Utc>) {}

    fn on_restore_finished(&self, _finished_at: DateTime<Utc>, _duration_ms: u64, _restored: usize) {}

    fn on_size_changed(&self, _current: usize, _previous: usize) {}
}

pub trait ExecutorListener<P>: Send + Sync {
    fn on_added_to_queue(&self, _task: &Descriptor<P>, _counts: QueueCounts) {}

    /// `worker` is the index of the worker loop that picked the task up.
    fn on_before_execute(&self, _task: &Descriptor<P>, _worker: usize, _counts: QueueCounts) {}

    fn on_after_execute(
        &self,
        _task: &Descriptor<P>,
        _outcome: &RunOutcome,
        _timing: &ExecTiming,
        _counts: QueueCounts,
    ) {
    }

    /// The task reached a terminal state and left the store. A queued task
    /// an add rule evicted before it could start is reported as `Cancelled`.
    fn on_finished(&self, _task: &Descriptor<P>, _outcome: &RunOutcome) {}
}
