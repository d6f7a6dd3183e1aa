//! ExecutorBuilder - wiring for an `Executor`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::info;

use super::executor::{ExecState, Executor, RequeuePosition, Shared};
use super::worker_loop::WorkerGroup;
use crate::config::ExecutorConfig;
use crate::domain::Payload;
use crate::impls::{NeverRetry, RetryOnFailure};
use crate::observability::Listeners;
use crate::ports::{Clock, ExecutorListener, RetryValidator, SystemClock};
use crate::store::DurableStore;

/// ```ignore
/// let executor = ExecutorBuilder::new(Arc::clone(&store))
///     .pool_size(4)
///     .max_tasks(1_000)
///     .retry_validator(RetryOnFailure::new(5))
///     .listener(Arc::new(Metrics::default()))
///     .spawn();
/// ```
pub struct ExecutorBuilder<P: Payload> {
    store: Arc<DurableStore<P>>,
    pool_size: usize,
    max_tasks: usize,
    requeue: RequeuePosition,
    validator: Arc<dyn RetryValidator<P>>,
    clock: Arc<dyn Clock>,
    listeners: Vec<Arc<dyn ExecutorListener<P>>>,
}

impl<P: Payload> ExecutorBuilder<P> {
    /// Defaults: 2 workers, unlimited tasks, `NeverRetry`, requeue at the front.
    pub fn new(store: Arc<DurableStore<P>>) -> Self {
        Self {
            store,
            pool_size: 2,
            max_tasks: 0,
            requeue: RequeuePosition::Front,
            validator: Arc::new(NeverRetry),
            clock: Arc::new(SystemClock),
            listeners: Vec::new(),
        }
    }

    /// Uses `RetryOnFailure` with the configured attempt limit.
    pub fn from_config(store: Arc<DurableStore<P>>, config: &ExecutorConfig) -> Self {
        Self::new(store)
            .pool_size(config.pool_size)
            .max_tasks(config.max_tasks)
            .requeue(config.requeue)
            .retry_validator(RetryOnFailure::new(config.max_attempts))
    }

    /// Number of worker loops; at least 1.
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    /// Limit on queued plus running tasks; 0 means unlimited.
    pub fn max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    pub fn requeue(mut self, requeue: RequeuePosition) -> Self {
        self.requeue = requeue;
        self
    }

    pub fn retry_validator(mut self, validator: impl RetryValidator<P> + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ExecutorListener<P>>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Start the worker loops.
    ///
    /// # Panics
    /// Outside of a Tokio runtime.
    pub fn spawn(self) -> Executor<P> {
        let listeners = Listeners::new();
        for listener in self.listeners {
            listeners.subscribe(listener);
        }
        let shared = Arc::new(Shared {
            store: self.store,
            state: Mutex::new(ExecState {
                ready: VecDeque::new(),
                active: HashMap::new(),
                running: 0,
                settling: 0,
                accepting: true,
            }),
            work: Notify::new(),
            idle: Notify::new(),
            listeners,
            validator: self.validator,
            clock: self.clock,
            interrupt: Arc::new(AtomicBool::new(false)),
            pool_size: self.pool_size,
            max_tasks: self.max_tasks,
            requeue: self.requeue,
        });

        let group = WorkerGroup::spawn(self.pool_size, Arc::clone(&shared));
        info!(
            pool_size = self.pool_size,
            max_tasks = self.max_tasks,
            requeue = ?self.requeue,
            "executor started"
        );
        Executor {
            shared,
            group: Mutex::new(Some(group)),
        }
    }
}
