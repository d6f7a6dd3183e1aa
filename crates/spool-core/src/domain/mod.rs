//! Domain model (ids, descriptors, outcomes).

pub mod ids;
pub mod outcome;
pub mod task;

pub use ids::TaskId;
pub use outcome::{ExecTiming, OutcomeKind, RunOutcome, TaskError};
pub use task::{Descriptor, Payload};
