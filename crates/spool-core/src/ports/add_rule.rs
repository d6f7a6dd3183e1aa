//! AddRule port: what a full store does with one more insert.

use std::sync::Arc;

use crate::domain::Descriptor;

/// Capacity-overflow strategy.
///
/// Rules can be called from several producer and worker threads at once, so
/// they must be stateless or synchronise internally.
pub trait AddRule<P>: Send + Sync {
    /// May an insert proceed past capacity by evicting an entry?
    fn allow_add_if_full(&self) -> bool;

    /// Pick the entry to evict, as a position in `entries` (store order).
    ///
    /// Only called when `allow_add_if_full()` is true and the store is at
    /// capacity. The store removes the chosen entry, deletes its artifact and
    /// then inserts. Returning `None` (or an out-of-range position) rejects the insert.
    ///
    /// Runs with the store lock held; it must not call back into the store.
    fn remove_any(&self, entries: &[Arc<Descriptor<P>>]) -> Option<usize>;
}
