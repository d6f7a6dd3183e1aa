//! App - the executor side.
//!
//! - **ExecutorBuilder / Executor**: bounded worker pool over a `DurableStore`
//! - **WorkerLoop**: take -> run -> decide (requeue or finish)
//! - **Job / Handler / RunContext**: what a worker runs
//! - **restore_queue_by_restorer**: hands restored descriptors to the executor

pub mod builder;
pub mod executor;
pub mod job;
mod restore;
mod worker_loop;

pub use self::builder::ExecutorBuilder;
pub use self::executor::{Executor, RequeuePosition, ShutdownPolicy};
pub use self::job::{Handler, Job, RunContext};
