//! Executor - bounded worker pool over a `DurableStore`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::job::Job;
use super::worker_loop::WorkerGroup;
use crate::domain::{Descriptor, Payload, TaskId};
use crate::error::ExecutorError;
use crate::observability::{ListenerId, Listeners, QueueCounts};
use crate::ports::{ActiveTasks, Clock, ExecutorListener, RetryValidator};
use crate::store::DurableStore;

/// Where a task the retry validator sent back lands in the ready queue.
///
/// Only matters for Queue stores. On a List store dispatch follows store
/// index order and a retried descriptor keeps its index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequeuePosition {
    /// Ahead of everything waiting, i.e. it keeps its turn.
    #[default]
    Front,

    /// Behind everything waiting.
    Back,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Running handlers finish normally.
    #[default]
    Graceful,

    /// Running handlers see `RunContext::checkpoint` fail with `Interrupted`.
    Interrupt,
}

pub(crate) struct Queued<P> {
    pub job: Job<P>,
    pub queued_at: Instant,
}

pub(crate) struct ExecState<P> {
    pub ready: VecDeque<Queued<P>>,
    /// Every queued or running descriptor, by id.
    pub active: HashMap<TaskId, Arc<Descriptor<P>>>,
    pub running: usize,
    /// Finished runs whose retry decision is still pending.
    pub settling: usize,
    pub accepting: bool,
}

impl<P> ExecState<P> {
    pub fn counts(&self) -> QueueCounts {
        QueueCounts {
            waiting: self.ready.len(),
            active: self.running,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.running == 0 && self.settling == 0
    }
}

pub(crate) struct Shared<P: Payload> {
    pub store: Arc<DurableStore<P>>,
    pub state: Mutex<ExecState<P>>,
    pub work: Notify,
    pub idle: Notify,
    pub listeners: Listeners<dyn ExecutorListener<P>>,
    pub validator: Arc<dyn RetryValidator<P>>,
    pub clock: Arc<dyn Clock>,
    pub interrupt: Arc<AtomicBool>,
    pub pool_size: usize,
    pub max_tasks: usize,
    pub requeue: RequeuePosition,
}

impl<P: Payload> Shared<P> {
    pub fn signal_if_idle(&self) {
        if self.state.lock().is_idle() {
            self.idle.notify_waiters();
        }
    }
}

impl<P: Payload> ActiveTasks for Shared<P> {
    fn is_active(&self, id: TaskId) -> bool {
        self.state.lock().active.contains_key(&id)
    }

    fn active_len(&self) -> usize {
        self.state.lock().active.len()
    }
}

/// Runs jobs from a `DurableStore` on a fixed number of worker loops.
///
/// Per id the life cycle is `Queued -> Running -> {Succeeded, Failed -> Queued,
/// Failed, Cancelled}`. Terminal outcomes remove the descriptor from the store;
/// a retry goes back to the ready queue and stays in the store.
///
/// Waiting jobs start in store index order on a List store and in submission
/// order on a Queue store. A panicking listener or retry validator is logged
/// and never takes a worker loop down with it.
///
/// Built with [`ExecutorBuilder`](super::ExecutorBuilder).
pub struct Executor<P: Payload> {
    pub(crate) shared: Arc<Shared<P>>,
    pub(crate) group: Mutex<Option<WorkerGroup>>,
}

impl<P: Payload> Executor<P> {
    pub fn store(&self) -> &Arc<DurableStore<P>> {
        &self.shared.store
    }

    pub fn pool_size(&self) -> usize {
        self.shared.pool_size
    }

    /// Queue a job whose descriptor is already in the store.
    ///
    /// `Ok(false)` when the descriptor is invalid or not in the store, its id
    /// is already queued or running, or `max_tasks` is reached.
    pub fn execute(&self, job: Job<P>) -> Result<bool, ExecutorError> {
        let task = Arc::clone(job.descriptor());
        if !task.is_valid() {
            debug!(id = %task.id(), "execute rejected: invalid descriptor");
            return Ok(false);
        }
        if !self.shared.store.contains_id(task.id())? {
            debug!(id = %task.id(), "execute rejected: not in store");
            return Ok(false);
        }

        let counts = {
            let mut state = self.shared.state.lock();
            if !state.accepting {
                return Err(ExecutorError::ShutDown);
            }
            if state.active.contains_key(&task.id()) {
                debug!(id = %task.id(), "execute rejected: already active");
                return Ok(false);
            }
            if self.shared.max_tasks != 0 && state.active.len() >= self.shared.max_tasks {
                debug!(id = %task.id(), max_tasks = self.shared.max_tasks, "execute rejected: executor full");
                return Ok(false);
            }
            state.active.insert(task.id(), Arc::clone(&task));
            state.ready.push_back(Queued {
                job,
                queued_at: Instant::now(),
            });
            state.counts()
        };

        debug!(id = %task.id(), waiting = counts.waiting, active = counts.active, "queued");
        self.shared.listeners.emit(|l| l.on_added_to_queue(&task, counts));
        self.shared.work.notify_one();
        Ok(true)
    }

    /// Add the descriptor to the store and queue the job.
    ///
    /// If the executor refuses the job the descriptor is taken back out of
    /// the store, so a rejected enqueue leaves no artifact behind.
    pub async fn enqueue(&self, job: Job<P>) -> Result<bool, ExecutorError> {
        if !self.is_accepting() {
            return Err(ExecutorError::ShutDown);
        }
        let store = Arc::clone(&self.shared.store);
        let task = Arc::clone(job.descriptor());
        if !blocking(move || store.add(task)).await? {
            return Ok(false);
        }

        let id = job.id();
        let queued = self.execute(job);
        if !matches!(queued, Ok(true)) {
            let store = Arc::clone(&self.shared.store);
            if let Err(err) = blocking(move || store.remove_by_id(id)).await {
                warn!(id = %id, error = %err, "failed to roll back rejected enqueue");
            }
        }
        queued
    }

    /// Flag a queued or running task as cancelled.
    ///
    /// A queued task is dropped when a worker reaches it; a running one stops
    /// at its handler's next checkpoint. Either way the outcome is
    /// `Cancelled` and the descriptor leaves the store.
    pub fn cancel(&self, id: TaskId) -> bool {
        let task = self.shared.state.lock().active.get(&id).cloned();
        match task {
            Some(task) => {
                task.cancel();
                debug!(id = %id, "cancel requested");
                true
            }
            None => false,
        }
    }

    pub fn counts(&self) -> QueueCounts {
        self.shared.state.lock().counts()
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.state.lock().accepting
    }

    /// Resolve once nothing is queued, running or awaiting a retry decision.
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = std::pin::pin!(self.shared.idle.notified());
            notified.as_mut().enable();
            if self.shared.state.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn ExecutorListener<P>>) -> ListenerId {
        self.shared.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.listeners.unsubscribe(id)
    }

    /// Stop accepting work and wait for the worker loops to exit.
    ///
    /// Jobs still waiting are dropped from the ready queue but stay in the
    /// store for the next restore. The store itself is left open.
    pub async fn shutdown(&self, policy: ShutdownPolicy) {
        {
            let mut state = self.shared.state.lock();
            if !state.accepting {
                return;
            }
            state.accepting = false;
        }
        if policy == ShutdownPolicy::Interrupt {
            self.shared.interrupt.store(true, Ordering::Release);
        }
        info!(?policy, "executor shutting down");

        let group = self.group.lock().take();
        if let Some(group) = group {
            group.shutdown_and_join().await;
        }

        let dropped = {
            let mut state = self.shared.state.lock();
            let dropped: Vec<TaskId> = state.ready.drain(..).map(|queued| queued.job.id()).collect();
            for id in &dropped {
                state.active.remove(id);
            }
            dropped.len()
        };
        self.shared.idle.notify_waiters();
        info!(dropped, "executor stopped");
    }
}

impl<P: Payload> ActiveTasks for Executor<P> {
    fn is_active(&self, id: TaskId) -> bool {
        self.shared.is_active(id)
    }

    fn active_len(&self) -> usize {
        self.shared.active_len()
    }
}

/// Run blocking store I/O off the async worker threads.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ExecutorError>
where
    F: FnOnce() -> Result<T, crate::error::StoreError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => Ok(result?),
        Err(err) => Err(ExecutorError::Join(err.to_string())),
    }
}
