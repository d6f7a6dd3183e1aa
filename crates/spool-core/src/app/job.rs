//! Job - a descriptor paired with the handler that runs it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::domain::{Descriptor, Payload, TaskError, TaskId};

/// Runs one descriptor.
///
/// ```ignore
/// struct UploadHandler;
///
/// #[async_trait]
/// impl Handler<Upload> for UploadHandler {
///     async fn handle(&self, task: &Descriptor<Upload>, cx: &RunContext) -> Result<(), TaskError> {
///         for chunk in chunks(&task.payload().path) {
///             cx.checkpoint(task)?;
///             send(chunk).await.map_err(|e| TaskError::failed(e.to_string()))?;
///         }
///         Ok(())
///     }
/// }
/// ```
///
/// Returning `Err` hands the error to the retry validator. A panic is caught
/// by the executor and reported as a failure.
#[async_trait]
pub trait Handler<P>: Send + Sync {
    async fn handle(&self, task: &Descriptor<P>, cx: &RunContext) -> Result<(), TaskError>;
}

/// Per-dispatch context passed to a handler.
#[derive(Debug, Clone)]
pub struct RunContext {
    worker: usize,
    attempt: u32,
    interrupt: Arc<AtomicBool>,
}

impl RunContext {
    pub(crate) fn new(worker: usize, attempt: u32, interrupt: Arc<AtomicBool>) -> Self {
        Self {
            worker,
            attempt,
            interrupt,
        }
    }

    /// Index of the worker loop running this dispatch.
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// 1 on the first run, incremented on every retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The executor is shutting down with `ShutdownPolicy::Interrupt`.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    /// Cooperative cancellation point.
    ///
    /// `Err(Cancelled)` once the descriptor was cancelled, `Err(Interrupted)`
    /// once an interrupting shutdown started. Handlers return the error as is.
    pub fn checkpoint<P: Payload>(&self, task: &Descriptor<P>) -> Result<(), TaskError> {
        if task.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        if self.is_interrupted() {
            return Err(TaskError::Interrupted);
        }
        Ok(())
    }
}

pub struct Job<P> {
    descriptor: Arc<Descriptor<P>>,
    handler: Arc<dyn Handler<P>>,
}

impl<P: Payload> Job<P> {
    pub fn new(descriptor: Arc<Descriptor<P>>, handler: Arc<dyn Handler<P>>) -> Self {
        Self {
            descriptor,
            handler,
        }
    }

    pub fn id(&self) -> TaskId {
        self.descriptor.id()
    }

    pub fn descriptor(&self) -> &Arc<Descriptor<P>> {
        &self.descriptor
    }

    pub fn handler(&self) -> &Arc<dyn Handler<P>> {
        &self.handler
    }
}

impl<P> Clone for Job<P> {
    fn clone(&self) -> Self {
        Self {
            descriptor: Arc::clone(&self.descriptor),
            handler: Arc::clone(&self.handler),
        }
    }
}
