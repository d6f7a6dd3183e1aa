//! spool-core
//!
//! A durable task queue and a bounded executor on top of it.
//!
//! # Modules
//! - **domain**: ids, descriptors, payloads, outcomes
//! - **ports**: the seams (AddRule, RetryValidator, listeners, Clock, IdGenerator)
//! - **impls**: stock add rules and retry validators
//! - **store**: `DurableStore`, one artifact file per descriptor, restore pass
//! - **app**: `Executor`, worker loops, restore coordinator
//! - **observability**: listener registry, queue counts
//! - **config**: TOML configuration
//! - **error**: error types
//!
//! ```ignore
//! let store = DurableStore::<Upload>::builder("/var/lib/app/uploads").open()?;
//! store.wait_restored();
//!
//! let executor = ExecutorBuilder::new(Arc::clone(&store))
//!     .retry_validator(RetryOnFailure::new(5))
//!     .spawn();
//! executor.restore_queue_by_restorer(|task| Some(Job::new(task, Arc::clone(&handler))))?;
//!
//! let ids = SequentialIdGenerator::after(store.find_by_min_max_id(false)?.map(|d| d.id()));
//! executor.enqueue(Job::new(Arc::new(Descriptor::new(ids.next_id(), "upload", upload)), handler)).await?;
//! ```

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod store;

pub use app::{Executor, ExecutorBuilder, Handler, Job, RequeuePosition, RunContext, ShutdownPolicy};
pub use config::SpoolConfig;
pub use domain::{Descriptor, Payload, RunOutcome, TaskError, TaskId};
pub use error::{ConfigError, ExecutorError, StoreError};
pub use store::{DurableStore, RestoreMode, StoreBuilder, StoreMode};
