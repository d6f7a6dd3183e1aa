//! Stock `RetryValidator`s.

use crate::domain::{Descriptor, Payload, TaskError};
use crate::ports::{ActiveTasks, RetryValidator};

/// Every run is final.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl<P> RetryValidator<P> for NeverRetry {
    fn should_retry(&self, _task: &Descriptor<P>, _error: Option<&TaskError>, _active: &dyn ActiveTasks) -> bool {
        false
    }
}

/// Re-run failed tasks until they have been attempted `max_attempts` times.
///
/// Successful runs and ids that were resubmitted in the meantime are final.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnFailure {
    max_attempts: u32,
}

impl RetryOnFailure {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryOnFailure {
    fn default() -> Self {
        Self::new(3)
    }
}

impl<P: Payload> RetryValidator<P> for RetryOnFailure {
    fn should_retry(&self, task: &Descriptor<P>, error: Option<&TaskError>, active: &dyn ActiveTasks) -> bool {
        error.is_some() && !active.is_active(task.id()) && task.attempts() < self.max_attempts
    }
}
