//! Restore coordinator: feed restored descriptors back to the executor.

use std::sync::Arc;

use tracing::info;

use super::executor::Executor;
use super::job::Job;
use crate::domain::{Descriptor, Payload};
use crate::error::ExecutorError;
use crate::ports::ActiveTasks;

impl<P: Payload> Executor<P> {
    /// Queue every idle descriptor currently in the store, in store order.
    ///
    /// `restorer` turns a descriptor into a runnable job; returning `None`
    /// leaves the descriptor in the store unscheduled. Descriptors that are
    /// running or already active are skipped.
    ///
    /// This does not wait for the store's restore pass. Call it after
    /// `DurableStore::wait_restored()` (or once `is_restored()` is true),
    /// otherwise only the entries restored so far are seen.
    pub fn restore_queue_by_restorer<F>(&self, restorer: F) -> Result<usize, ExecutorError>
    where
        F: Fn(Arc<Descriptor<P>>) -> Option<Job<P>>,
    {
        let entries = self.store().get_all()?;
        let total = entries.len();
        let mut queued = 0;
        for task in entries {
            if task.is_running() || self.is_active(task.id()) {
                continue;
            }
            let Some(job) = restorer(task) else {
                continue;
            };
            if self.execute(job)? {
                queued += 1;
            }
        }
        info!(queued, stored = total, "queue restored");
        Ok(queued)
    }
}
