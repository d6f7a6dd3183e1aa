//! RetryValidator port - 実行後に再スケジュールするか終了するかを決める
//!
//! 判定時点で同じ id が再投入済みかどうかは `ActiveTasks` で確認できる。

use std::marker::PhantomData;

use crate::domain::{Descriptor, TaskError, TaskId};

/// Read-only view of the executor's active registry.
pub trait ActiveTasks {
    /// Is `id` queued or running in the executor right now?
    fn is_active(&self, id: TaskId) -> bool;

    fn active_len(&self) -> usize;
}

/// Decides whether a finished task must run again.
///
/// By the time this is called the finished task is no longer in the active
/// registry. If `active.is_active(task.id())` is true anyway, a fresh
/// submission under the same id has already been dispatched; returning true
/// then is harmless (the executor refuses to run one id twice) but pointless.
///
/// Validators are invoked concurrently from different workers, so they must
/// be stateless or synchronise internally.
pub trait RetryValidator<P>: Send + Sync {
    fn should_retry(
        &self,
        task: &Descriptor<P>,
        error: Option<&TaskError>,
        active: &dyn ActiveTasks,
    ) -> bool;
}

/// Adapter for closures. See [`retry_fn`].
pub struct FnValidator<F, P> {
    f: F,
    _marker: PhantomData<fn(&P)>,
}

/// Wrap a closure as a `RetryValidator`.
///
/// ```ignore
/// let validator = retry_fn(|task: &Descriptor<Upload>, error, active| {
///     error.is_some() && !active.is_active(task.id())
/// });
/// ```
pub fn retry_fn<P, F>(f: F) -> FnValidator<F, P>
where
    F: Fn(&Descriptor<P>, Option<&TaskError>, &dyn ActiveTasks) -> bool + Send + Sync,
{
    FnValidator {
        f,
        _marker: PhantomData,
    }
}

impl<P, F> RetryValidator<P> for FnValidator<F, P>
where
    F: Fn(&Descriptor<P>, Option<&TaskError>, &dyn ActiveTasks) -> bool + Send + Sync,
{
    fn should_retry(
        &self,
        task: &Descriptor<P>,
        error: Option<&TaskError>,
        active: &dyn ActiveTasks,
    ) -> bool {
        (self.f)(task, error, active)
    }
}
