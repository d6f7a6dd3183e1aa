//! Stock `AddRule`s.

use std::sync::Arc;

use rand::Rng;

use crate::domain::{Descriptor, Payload};
use crate::ports::AddRule;

/// Reject every insert past capacity. Same as opening a store without a rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardLimit;

impl<P> AddRule<P> for HardLimit {
    fn allow_add_if_full(&self) -> bool {
        false
    }

    fn remove_any(&self, _entries: &[Arc<Descriptor<P>>]) -> Option<usize> {
        None
    }
}

/// Evict the entry closest to the head that is not currently running.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictOldest;

impl<P: Payload> AddRule<P> for EvictOldest {
    fn allow_add_if_full(&self) -> bool {
        true
    }

    fn remove_any(&self, entries: &[Arc<Descriptor<P>>]) -> Option<usize> {
        entries.iter().position(|entry| !entry.is_running())
    }
}

/// Evict a uniformly chosen entry that is not currently running.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictRandom;

impl<P: Payload> AddRule<P> for EvictRandom {
    fn allow_add_if_full(&self) -> bool {
        true
    }

    fn remove_any(&self, entries: &[Arc<Descriptor<P>>]) -> Option<usize> {
        let idle: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_running())
            .map(|(i, _)| i)
            .collect();
        if idle.is_empty() {
            return None;
        }
        Some(idle[rand::thread_rng().gen_range(0..idle.len())])
    }
}
