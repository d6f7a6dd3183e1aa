//! Outcome model: what happened to one dispatch of a task.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned by a task handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    /// The descriptor was cancelled and the handler stopped at a checkpoint.
    #[error("task cancelled")]
    Cancelled,

    /// The executor is shutting down with `ShutdownPolicy::Interrupt`.
    #[error("task interrupted by shutdown")]
    Interrupted,
}

impl TaskError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Classification of a finished dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Succeeded,
    Failed,
    Cancelled,
    Interrupted,
}

/// Result of one dispatch, as reported to executor listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded,
    Failed(TaskError),
    Cancelled,
    Interrupted,
}

impl RunOutcome {
    pub(crate) fn from_result(result: Result<(), TaskError>) -> Self {
        match result {
            Ok(()) => RunOutcome::Succeeded,
            Err(TaskError::Cancelled) => RunOutcome::Cancelled,
            Err(TaskError::Interrupted) => RunOutcome::Interrupted,
            Err(err) => RunOutcome::Failed(err),
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            RunOutcome::Succeeded => OutcomeKind::Succeeded,
            RunOutcome::Failed(_) => OutcomeKind::Failed,
            RunOutcome::Cancelled => OutcomeKind::Cancelled,
            RunOutcome::Interrupted => OutcomeKind::Interrupted,
        }
    }

    /// The error handed to the retry validator, if the run failed.
    pub fn error(&self) -> Option<&TaskError> {
        match self {
            RunOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }
}

/// Timing of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecTiming {
    /// Wall clock time the handler started.
    pub started_at: DateTime<Utc>,

    /// Time spent in the ready queue before a worker picked the task up.
    pub queued_for: Duration,

    /// Time spent inside the handler.
    pub ran_for: Duration,
}
