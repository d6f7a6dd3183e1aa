//! WorkerLoop - take -> run -> decide を `pool_size` 個の Tokio task で回す
//!
//! List store ではストアの index 順、Queue store では投入順 (FIFO) で取り出す。

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::executor::{Queued, RequeuePosition, Shared, blocking};
use super::job::{Job, RunContext};
use crate::domain::{Descriptor, ExecTiming, Payload, RunOutcome, TaskError, TaskId};
use crate::observability::QueueCounts;
use crate::ports::ActiveTasks;
use crate::store::StoreMode;

/// Worker group handle.
/// - drop (または `shutdown_and_join`) で各ループは次の job を取る前に止まる
/// - 実行中の handler は abort しない。interrupt は協調的
pub(crate) struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` worker loops on the current Tokio runtime.
    pub fn spawn<P: Payload>(n: usize, shared: Arc<Shared<P>>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker in 0..n {
            let shared = Arc::clone(&shared);
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(worker_loop(worker, shared, rx)));
        }

        Self { shutdown_tx, joins }
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker loop panicked");
            }
        }
    }
}

async fn worker_loop<P: Payload>(worker: usize, shared: Arc<Shared<P>>, mut shutdown_rx: watch::Receiver<bool>) {
    debug!(worker, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let Some((queued, counts)) = take_next(&shared) else {
            tokio::select! {
                _ = shared.work.notified() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        };

        run(worker, &shared, queued, counts).await;
        shared.signal_if_idle();
    }
    debug!(worker, "worker stopped");
}

/// Pop the next ready job and count it as running.
///
/// On a List store the job whose descriptor sits at the lowest store index
/// goes first; ties and ids the store no longer holds fall back to ready
/// queue order.
fn take_next<P: Payload>(shared: &Shared<P>) -> Option<(Queued<P>, QueueCounts)> {
    let order = store_order(shared);
    let mut state = shared.state.lock();
    let pos = match &order {
        Some(order) => state
            .ready
            .iter()
            .enumerate()
            .min_by_key(|(_, queued)| order.get(&queued.job.id()).copied().unwrap_or(usize::MAX))
            .map(|(pos, _)| pos)?,
        None => 0,
    };
    let queued = state.ready.remove(pos)?;
    state.running += 1;
    let counts = state.counts();
    Some((queued, counts))
}

/// Store index by id, taken before locking the executor state.
fn store_order<P: Payload>(shared: &Shared<P>) -> Option<HashMap<TaskId, usize>> {
    if shared.store.mode() != StoreMode::List || shared.state.lock().ready.len() < 2 {
        return None;
    }
    let entries = shared.store.get_all().ok()?;
    Some(entries.iter().enumerate().map(|(index, task)| (task.id(), index)).collect())
}

async fn run<P: Payload>(worker: usize, shared: &Arc<Shared<P>>, queued: Queued<P>, counts: QueueCounts) {
    let Queued { job, queued_at } = queued;
    let task = Arc::clone(job.descriptor());
    let id = task.id();
    let queued_for = queued_at.elapsed();

    // An add rule may have evicted it while it was waiting.
    let still_stored = matches!(shared.store.contains_id(id), Ok(true));
    if task.is_cancelled() || !still_stored {
        release_slot(shared, id);
        if still_stored {
            debug!(id = %id, worker, "cancelled before start");
            finish(shared, &task, RunOutcome::Cancelled).await;
        } else {
            debug!(id = %id, worker, "dropped: no longer in store");
            shared.listeners.emit(|l| l.on_finished(&task, &RunOutcome::Cancelled));
        }
        end_settling(shared);
        return;
    }

    let attempt = task.begin_attempt();
    task.set_running(true);
    debug!(id = %id, name = task.name(), worker, attempt, "dispatch");
    shared.listeners.emit(|l| l.on_before_execute(&task, worker, counts));

    let started_at = shared.clock.now();
    let started = Instant::now();
    let outcome = invoke(&job, RunContext::new(worker, attempt, Arc::clone(&shared.interrupt))).await;
    let timing = ExecTiming {
        started_at,
        queued_for,
        ran_for: started.elapsed(),
    };
    task.set_running(false);

    let counts = release_slot(shared, id);
    debug!(id = %id, worker, outcome = ?outcome.kind(), ran_ms = millis(timing.ran_for), "executed");
    shared
        .listeners
        .emit(|l| l.on_after_execute(&task, &outcome, &timing, counts));

    settle(shared, job, outcome).await;
    end_settling(shared);
}

/// Run the handler on its own task so a panic only fails this dispatch.
async fn invoke<P: Payload>(job: &Job<P>, cx: RunContext) -> RunOutcome {
    let handler = Arc::clone(job.handler());
    let task = Arc::clone(job.descriptor());
    let result = match tokio::spawn(async move { handler.handle(&task, &cx).await }).await {
        Ok(result) => result,
        Err(err) => {
            error!(id = %job.id(), error = %err, "handler panicked");
            Err(TaskError::failed(format!("handler panicked: {err}")))
        }
    };
    match RunOutcome::from_result(result) {
        RunOutcome::Failed(_) if job.descriptor().is_cancelled() => RunOutcome::Cancelled,
        outcome => outcome,
    }
}

/// Leave the running set and the active registry; the run is now settling.
fn release_slot<P: Payload>(shared: &Shared<P>, id: TaskId) -> QueueCounts {
    let mut state = shared.state.lock();
    state.running -= 1;
    state.settling += 1;
    state.active.remove(&id);
    state.counts()
}

fn end_settling<P: Payload>(shared: &Shared<P>) {
    let mut state = shared.state.lock();
    state.settling -= 1;
}

/// Decide between requeue, terminal removal and keeping the descriptor.
async fn settle<P: Payload>(shared: &Arc<Shared<P>>, job: Job<P>, outcome: RunOutcome) {
    let task = Arc::clone(job.descriptor());
    let id = task.id();
    match outcome {
        // Never consults the validator.
        RunOutcome::Cancelled => finish(shared, &task, outcome).await,
        RunOutcome::Interrupted => {
            debug!(id = %id, "interrupted; kept in store for the next restore");
        }
        RunOutcome::Succeeded | RunOutcome::Failed(_) => {
            let decided = catch_unwind(AssertUnwindSafe(|| {
                shared.validator.should_retry(&task, outcome.error(), &**shared)
            }));
            let retry = decided.unwrap_or_else(|_| {
                error!(id = %id, "retry validator panicked; not retrying");
                false
            });
            if retry {
                requeue(shared, job);
                return;
            }
            if shared.is_active(id) {
                debug!(id = %id, "superseded by a newer submission; keeping store entry");
                return;
            }
            finish(shared, &task, outcome).await;
        }
    }
}

/// Put a job back on the ready queue without touching the store.
fn requeue<P: Payload>(shared: &Shared<P>, job: Job<P>) {
    let task = Arc::clone(job.descriptor());
    let id = task.id();
    let counts = {
        let mut state = shared.state.lock();
        if !state.accepting {
            debug!(id = %id, "not requeued: executor shutting down; kept in store");
            return;
        }
        if state.active.contains_key(&id) {
            warn!(id = %id, "not requeued: id already active again");
            return;
        }
        state.active.insert(id, Arc::clone(&task));
        let queued = Queued {
            job,
            queued_at: Instant::now(),
        };
        match shared.requeue {
            RequeuePosition::Front => state.ready.push_front(queued),
            RequeuePosition::Back => state.ready.push_back(queued),
        }
        state.counts()
    };
    debug!(id = %id, attempts = task.attempts(), "requeued");
    shared.listeners.emit(|l| l.on_added_to_queue(&task, counts));
    shared.work.notify_one();
}

/// Terminal: remove from the store and report.
async fn finish<P: Payload>(shared: &Arc<Shared<P>>, task: &Arc<Descriptor<P>>, outcome: RunOutcome) {
    let id = task.id();
    let store = Arc::clone(&shared.store);
    match blocking(move || store.remove_by_id(id)).await {
        Ok(Some(_)) => {}
        Ok(None) => debug!(id = %id, "finished task was already gone from store"),
        Err(err) => warn!(id = %id, error = %err, "failed to remove finished task from store"),
    }
    debug!(id = %id, outcome = ?outcome.kind(), "finished");
    shared.listeners.emit(|l| l.on_finished(task, &outcome));
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
