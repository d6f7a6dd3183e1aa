//! `DurableStore` and its builder.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::artifact::ArtifactDir;
use super::{RestoreMode, StoreMode};
use crate::config::{AddRuleKind, StoreConfig};
use crate::domain::{Descriptor, Payload, TaskId};
use crate::error::StoreError;
use crate::impls::{EvictOldest, EvictRandom, HardLimit};
use crate::observability::{ListenerId, Listeners};
use crate::ports::{AddRule, Clock, StoreListener, SystemClock};

pub(super) struct StoreState<P> {
    pub entries: VecDeque<Arc<Descriptor<P>>>,
    pub released: bool,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct SizeChange {
    pub previous: usize,
    pub current: usize,
}

pub(super) struct RestoreControl {
    pub done: Mutex<bool>,
    pub cv: Condvar,
    pub stop: AtomicBool,
    pub handle: Mutex<Option<JoinHandle<()>>>,
}

/// Ordered collection of descriptors backed by one artifact file each.
///
/// Every mutation (and every snapshot read) is serialized under one lock;
/// artifact I/O happens synchronously on the calling thread while that lock
/// is held, so memory and disk change in the same order. Listener callbacks
/// are dispatched after the lock is released.
///
/// The store is usable as soon as `open()` returns, but entries restored
/// from disk only become visible as the restore pass progresses. Callers
/// that need every previously persisted task must check `is_restored()` or
/// block on `wait_restored()` first.
pub struct DurableStore<P: Payload> {
    pub(super) mode: StoreMode,
    pub(super) max_size: usize,
    pub(super) allow_sync: bool,
    pub(super) artifacts: ArtifactDir,
    pub(super) add_rule: Option<Arc<dyn AddRule<P>>>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) state: Mutex<StoreState<P>>,
    pub(super) listeners: Listeners<dyn StoreListener>,
    pub(super) restore: RestoreControl,
}

impl<P: Payload> DurableStore<P> {
    pub fn builder(dir: impl Into<PathBuf>) -> StoreBuilder<P> {
        StoreBuilder::new(dir)
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    /// Capacity, 0 meaning unlimited.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn allows_sync(&self) -> bool {
        self.allow_sync
    }

    pub fn dir(&self) -> &Path {
        self.artifacts.dir()
    }

    pub fn extension(&self) -> &str {
        self.artifacts.extension()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.max_size != 0 && self.len() >= self.max_size
    }

    /// Append a descriptor (tail for both modes) and persist it.
    ///
    /// Returns `Ok(false)` when the descriptor is invalid, its id is already
    /// present, or the store is full and the add rule does not evict.
    pub fn add(&self, task: Arc<Descriptor<P>>) -> Result<bool, StoreError> {
        let mut changes = Vec::new();
        let added = {
            let mut state = self.lock_live()?;
            self.insert_locked(&mut state, None, task, &mut changes)
        };
        self.publish(&changes);
        Ok(added)
    }

    /// Insert at `index` (list only). `index == len()` appends.
    pub fn insert(&self, index: usize, task: Arc<Descriptor<P>>) -> Result<bool, StoreError> {
        self.require_list("insert")?;
        let mut changes = Vec::new();
        let added = {
            let mut state = self.lock_live()?;
            self.insert_locked(&mut state, Some(index), task, &mut changes)
        };
        self.publish(&changes);
        Ok(added)
    }

    /// Replace the descriptor at `index` (list only), swapping its artifact.
    ///
    /// Fails when the new id belongs to a different entry.
    pub fn set(&self, index: usize, task: Arc<Descriptor<P>>) -> Result<bool, StoreError> {
        self.require_list("set")?;
        let mut state = self.lock_live()?;
        if !task.is_valid() || index >= state.entries.len() {
            return Ok(false);
        }
        let collides = state
            .entries
            .iter()
            .enumerate()
            .any(|(i, entry)| i != index && entry.id() == task.id());
        if collides {
            debug!(id = %task.id(), index, "set rejected: id held by another entry");
            return Ok(false);
        }

        let old = std::mem::replace(&mut state.entries[index], Arc::clone(&task));
        self.delete_artifact(&old);
        self.persist(&task);
        debug!(old = %old.id(), new = %task.id(), index, "replaced entry");
        Ok(true)
    }

    pub fn get(&self, index: usize) -> Result<Option<Arc<Descriptor<P>>>, StoreError> {
        self.require_list("get")?;
        Ok(self.lock_live()?.entries.get(index).cloned())
    }

    /// Remove the entry at `index` (list only) and delete its artifact.
    pub fn remove(&self, index: usize) -> Result<Option<Arc<Descriptor<P>>>, StoreError> {
        self.require_list("remove")?;
        self.take_where(|state| (index < state.entries.len()).then_some(index))
    }

    /// Remove by id and delete the artifact. Allowed in both modes: the
    /// executor finishes tasks in completion order, not queue order.
    pub fn remove_by_id(&self, id: TaskId) -> Result<Option<Arc<Descriptor<P>>>, StoreError> {
        self.take_where(|state| state.entries.iter().position(|entry| entry.id() == id))
    }

    pub fn poll_first(&self) -> Result<Option<Arc<Descriptor<P>>>, StoreError> {
        self.take_where(|state| (!state.entries.is_empty()).then_some(0))
    }

    pub fn poll_last(&self) -> Result<Option<Arc<Descriptor<P>>>, StoreError> {
        self.require_list("poll_last")?;
        self.take_where(|state| state.entries.len().checked_sub(1))
    }

    pub fn peek_first(&self) -> Result<Option<Arc<Descriptor<P>>>, StoreError> {
        Ok(self.lock_live()?.entries.front().cloned())
    }

    pub fn peek_last(&self) -> Result<Option<Arc<Descriptor<P>>>, StoreError> {
        self.require_list("peek_last")?;
        Ok(self.lock_live()?.entries.back().cloned())
    }

    /// Empty the store and delete every artifact with the store's extension
    /// in its directory, including ones no entry refers to.
    ///
    /// Meant for teardown and tests; finishing a task never calls this.
    pub fn clear(&self) -> Result<(), StoreError> {
        let change = {
            let mut state = self.lock_live()?;
            let previous = state.entries.len();
            state.entries.clear();
            if self.allow_sync {
                self.delete_all_artifacts();
            }
            SizeChange {
                previous,
                current: 0,
            }
        };
        info!(dir = %self.dir().display(), removed = change.previous, "store cleared");
        self.publish(&[change]);
        Ok(())
    }

    pub fn find_by_id(&self, id: TaskId) -> Result<Option<Arc<Descriptor<P>>>, StoreError> {
        let state = self.lock_live()?;
        Ok(state.entries.iter().find(|entry| entry.id() == id).cloned())
    }

    pub fn contains_id(&self, id: TaskId) -> Result<bool, StoreError> {
        let state = self.lock_live()?;
        Ok(state.entries.iter().any(|entry| entry.id() == id))
    }

    /// Identity is the id; two descriptors with the same id are the same task.
    pub fn contains(&self, task: &Descriptor<P>) -> Result<bool, StoreError> {
        self.contains_id(task.id())
    }

    pub fn index_of(&self, id: TaskId) -> Result<Option<usize>, StoreError> {
        let state = self.lock_live()?;
        Ok(state.entries.iter().position(|entry| entry.id() == id))
    }

    /// Entry with the smallest (`min == true`) or largest id.
    pub fn find_by_min_max_id(&self, min: bool) -> Result<Option<Arc<Descriptor<P>>>, StoreError> {
        let state = self.lock_live()?;
        let found = if min {
            state.entries.iter().min_by_key(|entry| entry.id())
        } else {
            state.entries.iter().max_by_key(|entry| entry.id())
        };
        Ok(found.cloned())
    }

    /// Snapshot in store order.
    pub fn get_all(&self) -> Result<Vec<Arc<Descriptor<P>>>, StoreError> {
        Ok(self.lock_live()?.entries.iter().cloned().collect())
    }

    pub fn subscribe(&self, listener: Arc<dyn StoreListener>) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Has the restore pass finished (or been skipped, or the store released)?
    pub fn is_restored(&self) -> bool {
        *self.restore.done.lock()
    }

    /// Block until `is_restored()`.
    pub fn wait_restored(&self) {
        let mut done = self.restore.done.lock();
        while !*done {
            self.restore.cv.wait(&mut done);
        }
    }

    /// Block until `is_restored()` or `timeout` elapses. Returns the final state.
    pub fn wait_restored_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.restore.done.lock();
        while !*done {
            if self.restore.cv.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        *done
    }

    /// Stop an in-flight restore, detach every listener and refuse further use.
    ///
    /// Persisted artifacts are left on disk; only `clear()` deletes them.
    pub fn release(&self) {
        self.restore.stop.store(true, Ordering::Release);
        let handle = self.restore.handle.lock().take();
        if let Some(handle) = handle
            && handle.thread().id() != thread::current().id()
            && handle.join().is_err()
        {
            warn!(dir = %self.dir().display(), "restore thread panicked");
        }

        {
            let mut state = self.state.lock();
            if state.released {
                return;
            }
            state.released = true;
        }
        self.listeners.clear();
        self.mark_restored();
        info!(dir = %self.dir().display(), "store released");
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    fn lock_live(&self) -> Result<MutexGuard<'_, StoreState<P>>, StoreError> {
        let state = self.state.lock();
        if state.released {
            return Err(StoreError::Released);
        }
        Ok(state)
    }

    fn require_list(&self, op: &'static str) -> Result<(), StoreError> {
        match self.mode {
            StoreMode::List => Ok(()),
            mode => Err(StoreError::Unsupported { op, mode }),
        }
    }

    fn insert_locked(
        &self,
        state: &mut StoreState<P>,
        index: Option<usize>,
        task: Arc<Descriptor<P>>,
        changes: &mut Vec<SizeChange>,
    ) -> bool {
        if !task.is_valid() {
            debug!(id = %task.id(), "rejected invalid descriptor");
            return false;
        }
        if state.entries.iter().any(|entry| entry.id() == task.id()) {
            debug!(id = %task.id(), "rejected duplicate id");
            return false;
        }
        if index.is_some_and(|i| i > state.entries.len()) {
            return false;
        }
        if !self.make_room(state, changes) {
            debug!(id = %task.id(), max_size = self.max_size, "rejected: store full");
            return false;
        }

        let previous = state.entries.len();
        match index {
            // An eviction may have shortened the list.
            Some(i) => state.entries.insert(i.min(previous), Arc::clone(&task)),
            None => state.entries.push_back(Arc::clone(&task)),
        }
        self.persist(&task);
        changes.push(SizeChange {
            previous,
            current: state.entries.len(),
        });
        debug!(id = %task.id(), name = task.name(), size = state.entries.len(), "added");
        true
    }

    /// Make space for one more entry, asking the add rule to evict if the
    /// store is at capacity. Returns false when the insert must be rejected.
    pub(super) fn make_room(&self, state: &mut StoreState<P>, changes: &mut Vec<SizeChange>) -> bool {
        if self.max_size == 0 || state.entries.len() < self.max_size {
            return true;
        }
        let Some(rule) = &self.add_rule else {
            return false;
        };
        if !rule.allow_add_if_full() {
            return false;
        }

        while state.entries.len() >= self.max_size {
            let Some(position) = rule.remove_any(state.entries.make_contiguous()) else {
                return false;
            };
            let previous = state.entries.len();
            let Some(victim) = state.entries.remove(position) else {
                return false;
            };
            self.delete_artifact(&victim);
            changes.push(SizeChange {
                previous,
                current: state.entries.len(),
            });
            debug!(id = %victim.id(), "evicted by add rule");
        }
        true
    }

    fn take_where(
        &self,
        locate: impl FnOnce(&StoreState<P>) -> Option<usize>,
    ) -> Result<Option<Arc<Descriptor<P>>>, StoreError> {
        let (taken, change) = {
            let mut state = self.lock_live()?;
            let Some(index) = locate(&*state) else {
                return Ok(None);
            };
            let previous = state.entries.len();
            let Some(taken) = state.entries.remove(index) else {
                return Ok(None);
            };
            self.delete_artifact(&taken);
            let change = SizeChange {
                previous,
                current: state.entries.len(),
            };
            (taken, change)
        };
        debug!(id = %taken.id(), size = change.current, "removed");
        self.publish(&[change]);
        Ok(Some(taken))
    }

    /// Best effort: a failed write is logged and the in-memory entry stays.
    pub(super) fn persist(&self, task: &Descriptor<P>) {
        if !self.allow_sync {
            return;
        }
        if let Err(err) = self.artifacts.write(task) {
            warn!(id = %task.id(), error = %err, "failed to persist descriptor; keeping in-memory entry");
        }
    }

    pub(super) fn delete_artifact(&self, task: &Descriptor<P>) {
        if !self.allow_sync {
            return;
        }
        self.discard(&self.artifacts.path_for(task));
    }

    pub(super) fn discard(&self, path: &Path) {
        if let Err(err) = self.artifacts.delete(path) {
            warn!(path = %path.display(), error = %err, "failed to delete artifact");
        }
    }

    fn delete_all_artifacts(&self) {
        match self.artifacts.list() {
            Ok(listing) => {
                for entry in listing {
                    self.discard(&entry.path);
                }
            }
            Err(err) => {
                warn!(dir = %self.dir().display(), error = %err, "failed to list artifacts for clear");
            }
        }
    }

    pub(super) fn publish(&self, changes: &[SizeChange]) {
        for change in changes {
            if change.previous != change.current {
                self.listeners
                    .emit(|l| l.on_size_changed(change.current, change.previous));
            }
        }
    }

    pub(super) fn stopping(&self) -> bool {
        self.restore.stop.load(Ordering::Acquire)
    }

    pub(super) fn mark_restored(&self) {
        *self.restore.done.lock() = true;
        self.restore.cv.notify_all();
    }
}

/// Builder for `DurableStore`.
///
/// Listeners given here are subscribed before the restore pass starts, so
/// they always see `on_restore_started`.
///
/// ```ignore
/// let store = DurableStore::<Upload>::builder("/var/lib/app/uploads")
///     .mode(StoreMode::Queue)
///     .max_size(500)
///     .add_rule(EvictOldest)
///     .listener(Arc::new(MyListener))
///     .open()?;
/// ```
pub struct StoreBuilder<P: Payload> {
    dir: PathBuf,
    extension: String,
    mode: StoreMode,
    max_size: usize,
    allow_sync: bool,
    restore: RestoreMode,
    add_rule: Option<Arc<dyn AddRule<P>>>,
    clock: Arc<dyn Clock>,
    listeners: Vec<Arc<dyn StoreListener>>,
}

impl<P: Payload> StoreBuilder<P> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extension: "task".to_string(),
            mode: StoreMode::List,
            max_size: 0,
            allow_sync: true,
            restore: RestoreMode::Background,
            add_rule: None,
            clock: Arc::new(SystemClock),
            listeners: Vec::new(),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        let builder = Self::new(&config.dir)
            .extension(config.extension.clone())
            .mode(config.mode)
            .max_size(config.max_size)
            .allow_sync(config.allow_sync)
            .restore(config.restore);
        match config.add_rule {
            AddRuleKind::HardLimit => builder.add_rule(HardLimit),
            AddRuleKind::EvictOldest => builder.add_rule(EvictOldest),
            AddRuleKind::EvictRandom => builder.add_rule(EvictRandom),
        }
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn mode(mut self, mode: StoreMode) -> Self {
        self.mode = mode;
        self
    }

    /// 0 means unlimited.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// With sync disabled nothing is written, deleted or restored.
    pub fn allow_sync(mut self, allow_sync: bool) -> Self {
        self.allow_sync = allow_sync;
        self
    }

    pub fn restore(mut self, restore: RestoreMode) -> Self {
        self.restore = restore;
        self
    }

    pub fn add_rule(mut self, rule: impl AddRule<P> + 'static) -> Self {
        self.add_rule = Some(Arc::new(rule));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn StoreListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Create the directory (when syncing) and start the restore pass.
    pub fn open(self) -> Result<Arc<DurableStore<P>>, StoreError> {
        let artifacts = ArtifactDir::new(self.dir, self.extension);
        if self.allow_sync {
            artifacts.ensure_dir()?;
        }
        let restore = if self.allow_sync {
            self.restore
        } else {
            RestoreMode::Skip
        };

        let store = Arc::new(DurableStore {
            mode: self.mode,
            max_size: self.max_size,
            allow_sync: self.allow_sync,
            artifacts,
            add_rule: self.add_rule,
            clock: self.clock,
            state: Mutex::new(StoreState {
                entries: VecDeque::new(),
                released: false,
            }),
            listeners: Listeners::new(),
            restore: RestoreControl {
                done: Mutex::new(false),
                cv: Condvar::new(),
                stop: AtomicBool::new(false),
                handle: Mutex::new(None),
            },
        });
        for listener in self.listeners {
            store.listeners.subscribe(listener);
        }

        match restore {
            RestoreMode::Skip => store.mark_restored(),
            RestoreMode::Blocking => store.run_restore(),
            RestoreMode::Background => {
                let worker = Arc::clone(&store);
                let handle = thread::Builder::new()
                    .name("spool-restore".to_string())
                    .spawn(move || worker.run_restore())?;
                *store.restore.handle.lock() = Some(handle);
            }
        }
        debug!(dir = %store.dir().display(), mode = %store.mode, ?restore, "store opened");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::fixtures::{Note, note};
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    fn open(tmp: &TempDir, mode: StoreMode, max_size: usize) -> Arc<DurableStore<Note>> {
        DurableStore::<Note>::builder(tmp.path())
            .mode(mode)
            .max_size(max_size)
            .restore(RestoreMode::Skip)
            .open()
            .unwrap()
    }

    fn ids(store: &DurableStore<Note>) -> Vec<i64> {
        store.get_all().unwrap().iter().map(|d| d.id().get()).collect()
    }

    fn artifact_count(tmp: &TempDir) -> usize {
        fs::read_dir(tmp.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "task"))
            .count()
    }

    #[derive(Default)]
    struct SizeLog(parking_lot::Mutex<Vec<(usize, usize)>>);

    impl StoreListener for SizeLog {
        fn on_size_changed(&self, current: usize, previous: usize) {
            self.0.lock().push((current, previous));
        }
    }

    #[test]
    fn add_persists_one_artifact_per_entry() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp, StoreMode::List, 0);

        assert!(store.add(Arc::new(note(1))).unwrap());
        assert!(store.add(Arc::new(note(2))).unwrap());

        assert_eq!(ids(&store), vec![1, 2]);
        assert!(tmp.path().join("note_1.task").exists());
        assert!(tmp.path().join("note_2.task").exists());
    }

    #[test]
    fn add_rejects_invalid_and_duplicate() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp, StoreMode::List, 0);

        let unset = Descriptor::new(TaskId::NO_ID, "x", Note { text: "a".into() });
        assert!(!store.add(Arc::new(unset)).unwrap());

        assert!(store.add(Arc::new(note(1))).unwrap());
        let same_id = Descriptor::new(1, "other", Note { text: "b".into() });
        assert!(!store.add(Arc::new(same_id)).unwrap());

        assert_eq!(store.len(), 1);
        assert_eq!(artifact_count(&tmp), 1);
    }

    #[test]
    fn hard_capacity_rejects_past_max_size() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp, StoreMode::List, 2);

        assert!(store.add(Arc::new(note(1))).unwrap());
        assert!(store.add(Arc::new(note(2))).unwrap());
        assert!(store.is_full());
        assert!(!store.add(Arc::new(note(3))).unwrap());

        assert_eq!(ids(&store), vec![1, 2]);
        assert_eq!(artifact_count(&tmp), 2);
    }

    #[test]
    fn evicting_rule_makes_room() {
        let tmp = TempDir::new().unwrap();
        let log = Arc::new(SizeLog::default());
        let store = DurableStore::<Note>::builder(tmp.path())
            .max_size(2)
            .add_rule(EvictOldest)
            .restore(RestoreMode::Skip)
            .listener(log.clone())
            .open()
            .unwrap();

        for id in 1..=3 {
            assert!(store.add(Arc::new(note(id))).unwrap());
        }

        assert_eq!(ids(&store), vec![2, 3]);
        assert!(!tmp.path().join("note_1.task").exists());
        assert_eq!(*log.0.lock(), vec![(1, 0), (2, 1), (1, 2), (2, 1)]);
    }

    #[test]
    fn insert_get_and_set_on_list() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp, StoreMode::List, 0);
        store.add(Arc::new(note(1))).unwrap();
        store.add(Arc::new(note(3))).unwrap();

        assert!(store.insert(1, Arc::new(note(2))).unwrap());
        assert!(!store.insert(9, Arc::new(note(4))).unwrap());
        assert_eq!(ids(&store), vec![1, 2, 3]);
        assert_eq!(store.get(1).unwrap().unwrap().id(), TaskId::new(2));

        assert!(store.set(1, Arc::new(note(20))).unwrap());
        assert_eq!(ids(&store), vec![1, 20, 3]);
        assert!(!tmp.path().join("note_2.task").exists());
        assert!(tmp.path().join("note_20.task").exists());
    }

    #[test]
    fn set_rejects_id_of_another_entry() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp, StoreMode::List, 0);
        store.add(Arc::new(note(1))).unwrap();
        store.add(Arc::new(note(2))).unwrap();

        assert!(!store.set(0, Arc::new(note(2))).unwrap());
        // Same id at the same slot is a plain replacement.
        let renamed = Descriptor::new(1, "renamed", Note { text: "x".into() });
        assert!(store.set(0, Arc::new(renamed)).unwrap());

        assert_eq!(ids(&store), vec![1, 2]);
        assert!(!tmp.path().join("note_1.task").exists());
        assert!(tmp.path().join("renamed_1.task").exists());
    }

    #[test]
    fn remove_variants_delete_artifacts() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp, StoreMode::List, 0);
        for id in 1..=4 {
            store.add(Arc::new(note(id))).unwrap();
        }

        assert_eq!(store.remove(1).unwrap().unwrap().id(), TaskId::new(2));
        assert_eq!(store.remove_by_id(TaskId::new(4)).unwrap().unwrap().id(), TaskId::new(4));
        assert_eq!(store.poll_last().unwrap().unwrap().id(), TaskId::new(3));
        assert!(store.remove(5).unwrap().is_none());
        assert!(store.remove_by_id(TaskId::new(99)).unwrap().is_none());

        assert_eq!(ids(&store), vec![1]);
        assert_eq!(artifact_count(&tmp), 1);
    }

    #[test]
    fn queue_is_fifo() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp, StoreMode::Queue, 0);
        for id in 1..=3 {
            store.add(Arc::new(note(id))).unwrap();
        }

        assert_eq!(store.peek_first().unwrap().unwrap().id(), TaskId::new(1));
        assert_eq!(store.poll_first().unwrap().unwrap().id(), TaskId::new(1));
        assert_eq!(ids(&store), vec![2, 3]);
        assert!(!tmp.path().join("note_1.task").exists());
    }

    #[rstest]
    #[case::insert("insert")]
    #[case::set("set")]
    #[case::get("get")]
    #[case::remove("remove")]
    #[case::poll_last("poll_last")]
    #[case::peek_last("peek_last")]
    fn queue_rejects_non_fifo_operations(#[case] op: &str) {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp, StoreMode::Queue, 0);
        store.add(Arc::new(note(1))).unwrap();

        let err = match op {
            "insert" => store.insert(0, Arc::new(note(2))).unwrap_err(),
            "set" => store.set(0, Arc::new(note(2))).unwrap_err(),
            "get" => store.get(0).unwrap_err(),
            "remove" => store.remove(0).unwrap_err(),
            "poll_last" => store.poll_last().unwrap_err(),
            "peek_last" => store.peek_last().unwrap_err(),
            other => unreachable!("{other}"),
        };
        assert!(matches!(err, StoreError::Unsupported { mode: StoreMode::Queue, .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn lookups() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp, StoreMode::List, 0);
        for id in [5, 2, 9] {
            store.add(Arc::new(note(id))).unwrap();
        }

        assert!(store.contains_id(TaskId::new(9)).unwrap());
        assert!(store.contains(&note(2)).unwrap());
        assert!(!store.contains(&note(3)).unwrap());
        assert_eq!(store.index_of(TaskId::new(9)).unwrap(), Some(2));
        assert_eq!(store.find_by_id(TaskId::new(2)).unwrap().unwrap().name(), "note");
        assert_eq!(store.find_by_min_max_id(true).unwrap().unwrap().id(), TaskId::new(2));
        assert_eq!(store.find_by_min_max_id(false).unwrap().unwrap().id(), TaskId::new(9));
    }

    #[test]
    fn clear_deletes_all_matching_artifacts() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp, StoreMode::List, 0);
        store.add(Arc::new(note(1))).unwrap();
        store.add(Arc::new(note(2))).unwrap();
        fs::write(tmp.path().join("orphan_7.task"), b"{}").unwrap();
        fs::write(tmp.path().join("keep.txt"), b"x").unwrap();

        store.clear().unwrap();

        assert!(store.is_empty());
        assert_eq!(artifact_count(&tmp), 0);
        assert!(tmp.path().join("keep.txt").exists());
    }

    #[test]
    fn persistence_failure_keeps_in_memory_entry() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("store");
        let store = DurableStore::<Note>::builder(&dir)
            .restore(RestoreMode::Skip)
            .open()
            .unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert!(store.add(Arc::new(note(1))).unwrap());
        assert_eq!(store.len(), 1);
        assert!(store.remove_by_id(TaskId::new(1)).unwrap().is_some());
    }

    #[test]
    fn without_sync_nothing_touches_disk() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("never");
        let store = DurableStore::<Note>::builder(&dir)
            .allow_sync(false)
            .open()
            .unwrap();

        assert!(store.is_restored());
        assert!(store.add(Arc::new(note(1))).unwrap());
        assert!(!dir.exists());
    }

    #[test]
    fn released_store_fails_fast() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp, StoreMode::List, 0);
        store.add(Arc::new(note(1))).unwrap();

        store.release();
        store.release();

        assert!(store.is_released());
        assert!(matches!(store.add(Arc::new(note(2))), Err(StoreError::Released)));
        assert!(matches!(store.get_all(), Err(StoreError::Released)));
        assert!(matches!(store.clear(), Err(StoreError::Released)));
        // Release never deletes persisted data.
        assert!(tmp.path().join("note_1.task").exists());
    }

    #[test]
    fn size_listener_sees_every_change() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp, StoreMode::List, 0);
        let log = Arc::new(SizeLog::default());
        let id = store.subscribe(log.clone());

        store.add(Arc::new(note(1))).unwrap();
        store.add(Arc::new(note(2))).unwrap();
        store.set(0, Arc::new(note(3))).unwrap();
        store.poll_first().unwrap();
        store.clear().unwrap();
        assert!(store.unsubscribe(id));
        store.add(Arc::new(note(4))).unwrap();

        assert_eq!(*log.0.lock(), vec![(1, 0), (2, 1), (1, 2), (0, 1)]);
    }

    struct ReadsBack {
        store: parking_lot::Mutex<Option<Arc<DurableStore<Note>>>>,
        seen: parking_lot::Mutex<Vec<usize>>,
    }

    impl StoreListener for ReadsBack {
        fn on_size_changed(&self, _current: usize, _previous: usize) {
            if let Some(store) = self.store.lock().as_ref() {
                self.seen.lock().push(store.len());
            }
        }
    }

    #[test]
    fn listener_runs_outside_the_store_lock() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp, StoreMode::List, 0);
        let listener = Arc::new(ReadsBack {
            store: parking_lot::Mutex::new(Some(Arc::clone(&store))),
            seen: parking_lot::Mutex::new(Vec::new()),
        });
        store.subscribe(listener.clone());

        store.add(Arc::new(note(1))).unwrap();

        assert_eq!(*listener.seen.lock(), vec![1]);
        listener.store.lock().take();
    }

    #[test]
    fn concurrent_adds_never_duplicate_ids() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp, StoreMode::List, 0);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for id in 0..50 {
                        store.add(Arc::new(note(id))).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen = ids(&store);
        assert_eq!(seen.len(), 50);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 50);
        assert_eq!(artifact_count(&tmp), 50);
    }
}
