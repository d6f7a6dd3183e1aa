//! Ports - the seams integrators plug into.
//!
//! - **AddRule**: capacity-overflow policy of a `DurableStore`
//! - **RetryValidator**: re-schedule vs. finish after a run
//! - **StoreListener / ExecutorListener**: lifecycle callbacks
//! - **Clock / IdGenerator**: time and id sources

pub mod add_rule;
pub mod clock;
pub mod id_generator;
pub mod listener;
pub mod retry_validator;

pub use self::add_rule::AddRule;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, SequentialIdGenerator};
pub use self::listener::{ExecutorListener, StoreListener};
pub use self::retry_validator::{ActiveTasks, FnValidator, RetryValidator, retry_fn};
