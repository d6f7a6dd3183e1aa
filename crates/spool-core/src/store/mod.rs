//! Durable store: an ordered, capacity-bounded collection of descriptors
//! mirrored to one artifact file per descriptor.
//!
//! Persistence is best effort. A failed write or delete is logged and the
//! in-memory operation still succeeds; disk and memory converge again on the
//! next restore pass (which drops unreadable artifacts) or on `clear()`.

mod artifact;
mod durable;
mod restore;

pub use self::durable::{DurableStore, StoreBuilder};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordering semantics of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// Index-addressable, both ends.
    #[default]
    List,

    /// FIFO only. Random access and tail operations are programmer errors.
    Queue,
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreMode::List => f.write_str("list"),
            StoreMode::Queue => f.write_str("queue"),
        }
    }
}

/// How the restore pass runs when a store is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreMode {
    /// On a dedicated thread; `open()` returns immediately.
    #[default]
    Background,

    /// On the caller's thread, before `open()` returns.
    Blocking,

    /// Do not read the directory at all.
    Skip,
}
