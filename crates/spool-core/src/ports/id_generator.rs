//! IdGenerator port.
//!
//! Ids are picked by producers. A store only requires uniqueness, so a counter
//! seeded past the highest restored id is enough for a single process.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::domain::TaskId;

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> TaskId;
}

/// Monotonic counter.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    next: AtomicI64,
}

impl SequentialIdGenerator {
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }

    /// Continue after the highest id already in use, e.g.
    /// `SequentialIdGenerator::after(store.find_by_min_max_id(false)?.map(|d| d.id()))`.
    pub fn after(highest: Option<TaskId>) -> Self {
        let first = highest.map_or(1, |id| id.get().saturating_add(1).max(1));
        Self::starting_at(first)
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> TaskId {
        TaskId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
