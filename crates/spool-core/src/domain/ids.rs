//! Task identifiers.
//!
//! Ids are plain integers chosen by the producer. They only need to be unique
//! within one store; `TaskId::NO_ID` marks a descriptor whose id was never set.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a task descriptor.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    /// Sentinel for "unset". Descriptors carrying it are never valid.
    pub const NO_ID: TaskId = TaskId(-1);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub const fn is_set(self) -> bool {
        self.0 != Self::NO_ID.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::NO_ID
    }
}

impl From<i64> for TaskId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}
