//! Impls - stock implementations of the ports.
//!
//! - **HardLimit / EvictOldest / EvictRandom**: add rules
//! - **NeverRetry / RetryOnFailure**: retry validators

pub mod add_rules;
pub mod validators;

pub use self::add_rules::{EvictOldest, EvictRandom, HardLimit};
pub use self::validators::{NeverRetry, RetryOnFailure};
