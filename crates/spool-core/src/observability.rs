//! Counters and the listener registry shared by the store and the executor.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Executor load as reported to listeners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Submitted, not yet picked up by a worker.
    pub waiting: usize,

    /// Currently inside a handler.
    pub active: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Publish/subscribe registry.
/// - `emit` は購読者リストのスナップショットを取り、ロックを持たずに呼ぶ
///   (listener から subscribe / unsubscribe / publisher への再入が可能)
/// - listener の panic はその呼び出しだけで止まり、他の listener と発行元には届かない
pub struct Listeners<L: ?Sized> {
    entries: RwLock<Vec<(ListenerId, Arc<L>)>>,
    next_id: AtomicU64,
}

impl<L: ?Sized> Listeners<L> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Call `f` for every subscriber in subscription order.
    pub fn emit(&self, f: impl Fn(&L)) {
        let snapshot: Vec<Arc<L>> = self
            .entries
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(&listener))) {
                error!(reason = panic_message(&*panic), "listener panicked");
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl<L: ?Sized> Default for Listeners<L> {
    fn default() -> Self {
        Self::new()
    }
}
