//! Restore pass: rebuild a store's in-memory order from its artifact directory.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::artifact::{ArtifactEntry, ArtifactError};
use super::durable::{DurableStore, SizeChange, StoreState};
use crate::domain::{Descriptor, Payload};

impl<P: Payload> DurableStore<P> {
    /// Run one restore pass and mark the store restored.
    ///
    /// `on_restore_finished` is only reported for a pass that ran to the end;
    /// a pass cut short by `release` just wakes the waiters.
    ///
    /// Artifacts are restored oldest first (modification time, then id).
    /// Unreadable or invalid artifacts are deleted. Restored entries go
    /// through the same capacity and add-rule checks as a live `add`, and
    /// an id already present (added live while the pass was running) wins
    /// over its artifact.
    pub(super) fn run_restore(&self) {
        let started = Instant::now();
        let started_at = self.clock.now();
        info!(dir = %self.dir().display(), "restore started");
        self.listeners.emit(|l| l.on_restore_started(started_at));

        let restored = self.restore_artifacts();
        if self.stopping() {
            // Released mid-pass: no finish event, but waiters still wake.
            info!(dir = %self.dir().display(), restored, "restore aborted by release");
            self.mark_restored();
            return;
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(dir = %self.dir().display(), restored, duration_ms, "restore finished");
        let finished_at = self.clock.now();
        self.listeners
            .emit(|l| l.on_restore_finished(finished_at, duration_ms, restored));
        // Waiters wake only after every listener saw the finish.
        self.mark_restored();
    }

    fn restore_artifacts(&self) -> usize {
        let listing = match self.artifacts.list() {
            Ok(listing) => listing,
            Err(err) => {
                warn!(dir = %self.dir().display(), error = %err, "cannot list artifacts; nothing restored");
                return 0;
            }
        };

        let mut decoded: Vec<(ArtifactEntry, Descriptor<P>)> = Vec::with_capacity(listing.len());
        for entry in listing {
            if self.stopping() {
                return 0;
            }
            if let Some(task) = self.decode(&entry.path) {
                decoded.push((entry, task));
            }
        }
        decoded.sort_by(|(a, ta), (b, tb)| {
            a.modified.cmp(&b.modified).then_with(|| ta.id().cmp(&tb.id()))
        });

        let mut restored = 0;
        for (entry, task) in decoded {
            if self.stopping() {
                break;
            }
            let task = Arc::new(task);
            let mut changes = Vec::new();
            let accepted = {
                let mut state = self.state.lock();
                if state.released {
                    break;
                }
                self.restore_one(&mut state, &entry.path, &task, &mut changes)
            };
            self.publish(&changes);
            if accepted {
                restored += 1;
            }
        }
        restored
    }

    fn decode(&self, path: &Path) -> Option<Descriptor<P>> {
        let decoded = fs::read(path)
            .map_err(ArtifactError::from)
            .and_then(|bytes| Descriptor::from_durable_bytes(&bytes).map_err(ArtifactError::from));
        match decoded {
            Ok(task) if task.is_valid() => Some(task),
            Ok(task) => {
                warn!(path = %path.display(), id = %task.id(), "dropping invalid artifact");
                self.discard(path);
                None
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "dropping unreadable artifact");
                self.discard(path);
                None
            }
        }
    }

    fn restore_one(
        &self,
        state: &mut StoreState<P>,
        path: &Path,
        task: &Arc<Descriptor<P>>,
        changes: &mut Vec<SizeChange>,
    ) -> bool {
        if let Some(live) = state.entries.iter().find(|entry| entry.id() == task.id()) {
            // Same file means a live add already rewrote it; anything else is stale.
            if self.artifacts.path_for(live) != path {
                self.discard(path);
            }
            debug!(id = %task.id(), path = %path.display(), "skipping duplicate artifact");
            return false;
        }
        if !self.make_room(state, changes) {
            warn!(id = %task.id(), max_size = self.max_size, "store full; dropping restored artifact");
            self.discard(path);
            return false;
        }

        task.set_running(false);
        let previous = state.entries.len();
        state.entries.push_back(Arc::clone(task));
        changes.push(SizeChange {
            previous,
            current: state.entries.len(),
        });

        if self.artifacts.path_for(task) != path {
            self.persist(task);
            self.discard(path);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};
    use std::sync::{Arc, mpsc};
    use std::thread;
    use std::time::{Duration, SystemTime};

    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;
    use tempfile::TempDir;

    use crate::domain::TaskId;
    use crate::domain::task::fixtures::{Note, note};
    use crate::impls::EvictOldest;
    use crate::ports::{FixedClock, StoreListener};
    use crate::store::{DurableStore, RestoreMode, StoreMode};

    fn seed(tmp: &TempDir, ids: &[i64]) {
        let store = DurableStore::<Note>::builder(tmp.path())
            .restore(RestoreMode::Skip)
            .open()
            .unwrap();
        for &id in ids {
            assert!(store.add(Arc::new(note(id))).unwrap());
        }
        store.release();
    }

    fn age(tmp: &TempDir, file: &str, seconds_ago: u64) {
        let when = SystemTime::now() - Duration::from_secs(seconds_ago);
        File::options()
            .write(true)
            .open(tmp.path().join(file))
            .unwrap()
            .set_modified(when)
            .unwrap();
    }

    fn reopen(tmp: &TempDir, restore: RestoreMode) -> Arc<DurableStore<Note>> {
        DurableStore::<Note>::builder(tmp.path())
            .restore(restore)
            .open()
            .unwrap()
    }

    fn ids(store: &DurableStore<Note>) -> Vec<i64> {
        store.get_all().unwrap().iter().map(|d| d.id().get()).collect()
    }

    #[test]
    fn blocking_restore_rebuilds_the_store() {
        let tmp = TempDir::new().unwrap();
        seed(&tmp, &[1, 2, 3]);
        age(&tmp, "note_1.task", 30);
        age(&tmp, "note_2.task", 20);
        age(&tmp, "note_3.task", 10);

        let store = reopen(&tmp, RestoreMode::Blocking);

        assert!(store.is_restored());
        assert_eq!(ids(&store), vec![1, 2, 3]);
        let first = store.peek_first().unwrap().unwrap();
        assert_eq!(*first, note(1));
        assert!(!first.is_running());
    }

    #[test]
    fn background_restore_is_observable_through_wait() {
        let tmp = TempDir::new().unwrap();
        seed(&tmp, &[4, 5]);

        let store = reopen(&tmp, RestoreMode::Background);
        store.wait_restored();

        assert!(store.is_restored());
        assert_eq!(store.len(), 2);
        assert!(store.wait_restored_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn restore_orders_by_modification_time() {
        let tmp = TempDir::new().unwrap();
        seed(&tmp, &[1, 2, 3]);
        age(&tmp, "note_1.task", 10);
        age(&tmp, "note_2.task", 30);
        age(&tmp, "note_3.task", 20);

        let store = reopen(&tmp, RestoreMode::Blocking);

        assert_eq!(ids(&store), vec![2, 3, 1]);
    }

    #[test]
    fn unreadable_and_invalid_artifacts_are_deleted() {
        let tmp = TempDir::new().unwrap();
        seed(&tmp, &[1]);
        fs::write(tmp.path().join("junk_9.task"), b"{ truncated").unwrap();
        let invalid = br#"{"kind":"test.note.v1","id":2,"name":"note","payload":{"text":""}}"#;
        fs::write(tmp.path().join("note_2.task"), invalid).unwrap();
        let foreign = br#"{"kind":"other.v1","id":3,"name":"note","payload":{"text":"x"}}"#;
        fs::write(tmp.path().join("note_3.task"), foreign).unwrap();

        let store = reopen(&tmp, RestoreMode::Blocking);

        assert_eq!(ids(&store), vec![1]);
        assert!(!tmp.path().join("junk_9.task").exists());
        assert!(!tmp.path().join("note_2.task").exists());
        assert!(!tmp.path().join("note_3.task").exists());
    }

    #[test]
    fn stale_duplicate_artifacts_are_removed() {
        let tmp = TempDir::new().unwrap();
        seed(&tmp, &[1]);
        fs::copy(tmp.path().join("note_1.task"), tmp.path().join("copy_1.task")).unwrap();
        age(&tmp, "note_1.task", 20);
        age(&tmp, "copy_1.task", 10);

        let store = reopen(&tmp, RestoreMode::Blocking);

        assert_eq!(ids(&store), vec![1]);
        assert!(tmp.path().join("note_1.task").exists());
        assert!(!tmp.path().join("copy_1.task").exists());
    }

    #[test]
    fn misnamed_artifact_is_moved_to_its_canonical_name() {
        let tmp = TempDir::new().unwrap();
        seed(&tmp, &[6]);
        fs::rename(tmp.path().join("note_6.task"), tmp.path().join("renamed.task")).unwrap();

        let store = reopen(&tmp, RestoreMode::Blocking);

        assert_eq!(ids(&store), vec![6]);
        assert!(tmp.path().join("note_6.task").exists());
        assert!(!tmp.path().join("renamed.task").exists());
    }

    #[test]
    fn restore_respects_capacity() {
        let tmp = TempDir::new().unwrap();
        seed(&tmp, &[1, 2, 3]);
        age(&tmp, "note_1.task", 30);
        age(&tmp, "note_2.task", 20);
        age(&tmp, "note_3.task", 10);

        let hard = DurableStore::<Note>::builder(tmp.path())
            .max_size(2)
            .restore(RestoreMode::Blocking)
            .open()
            .unwrap();
        assert_eq!(ids(&hard), vec![1, 2]);
        assert!(!tmp.path().join("note_3.task").exists());
        hard.release();

        seed(&tmp, &[3]);
        age(&tmp, "note_1.task", 30);
        age(&tmp, "note_2.task", 20);
        age(&tmp, "note_3.task", 10);
        let evicting = DurableStore::<Note>::builder(tmp.path())
            .max_size(2)
            .add_rule(EvictOldest)
            .restore(RestoreMode::Blocking)
            .open()
            .unwrap();
        assert_eq!(ids(&evicting), vec![2, 3]);
        assert!(!tmp.path().join("note_1.task").exists());
    }

    #[test]
    fn queue_mode_restores_fifo_order() {
        let tmp = TempDir::new().unwrap();
        seed(&tmp, &[10, 11]);
        age(&tmp, "note_10.task", 20);
        age(&tmp, "note_11.task", 10);

        let store = DurableStore::<Note>::builder(tmp.path())
            .mode(StoreMode::Queue)
            .restore(RestoreMode::Blocking)
            .open()
            .unwrap();

        assert_eq!(store.poll_first().unwrap().unwrap().id(), TaskId::new(10));
        assert_eq!(store.poll_first().unwrap().unwrap().id(), TaskId::new(11));
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl StoreListener for Events {
        fn on_restore_started(&self, started_at: DateTime<Utc>) {
            self.0.lock().push(format!("started {}", started_at.timestamp()));
        }

        fn on_restore_finished(&self, finished_at: DateTime<Utc>, _duration_ms: u64, restored: usize) {
            self.0
                .lock()
                .push(format!("finished {} {restored}", finished_at.timestamp()));
        }

        fn on_size_changed(&self, current: usize, previous: usize) {
            self.0.lock().push(format!("size {previous}->{current}"));
        }
    }

    #[test]
    fn restore_reports_lifecycle_to_builder_listeners() {
        let tmp = TempDir::new().unwrap();
        seed(&tmp, &[1, 2]);
        let events = Arc::new(Events::default());
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

        let store = DurableStore::<Note>::builder(tmp.path())
            .clock(FixedClock::new(at))
            .listener(events.clone())
            .restore(RestoreMode::Blocking)
            .open()
            .unwrap();

        assert_eq!(store.len(), 2);
        let ts = at.timestamp();
        assert_eq!(
            *events.0.lock(),
            vec![
                format!("started {ts}"),
                "size 0->1".to_string(),
                "size 1->2".to_string(),
                format!("finished {ts} 2"),
            ]
        );
    }

    #[test]
    fn skipped_restore_leaves_artifacts_alone() {
        let tmp = TempDir::new().unwrap();
        seed(&tmp, &[1]);

        let store = reopen(&tmp, RestoreMode::Skip);

        assert!(store.is_restored());
        assert!(store.is_empty());
        assert!(tmp.path().join("note_1.task").exists());
    }

    /// Holds the restore thread inside `on_restore_started` until told to go.
    struct Gate {
        go: Mutex<Option<mpsc::Receiver<()>>>,
        events: Events,
    }

    impl StoreListener for Gate {
        fn on_restore_started(&self, started_at: DateTime<Utc>) {
            if let Some(go) = self.go.lock().take() {
                go.recv().unwrap();
            }
            self.events.on_restore_started(started_at);
        }

        fn on_restore_finished(&self, finished_at: DateTime<Utc>, duration_ms: u64, restored: usize) {
            self.events.on_restore_finished(finished_at, duration_ms, restored);
        }

        fn on_size_changed(&self, current: usize, previous: usize) {
            self.events.on_size_changed(current, previous);
        }
    }

    #[test]
    fn release_mid_pass_skips_the_finish_event() {
        let tmp = TempDir::new().unwrap();
        seed(&tmp, &[1, 2, 3]);
        let (go_tx, go_rx) = mpsc::channel();
        let gate = Arc::new(Gate {
            go: Mutex::new(Some(go_rx)),
            events: Events::default(),
        });

        let store = DurableStore::<Note>::builder(tmp.path())
            .listener(gate.clone())
            .restore(RestoreMode::Background)
            .open()
            .unwrap();
        let releasing = Arc::clone(&store);
        let releaser = thread::spawn(move || releasing.release());
        while !store.stopping() {
            thread::sleep(Duration::from_millis(1));
        }
        go_tx.send(()).unwrap();
        releaser.join().unwrap();

        assert!(store.is_restored());
        assert!(store.is_empty());
        assert!(gate.events.0.lock().iter().all(|e| !e.starts_with("finished")));
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 3);
    }

    #[test]
    fn release_during_background_restore_returns() {
        let tmp = TempDir::new().unwrap();
        seed(&tmp, &(1..=200).collect::<Vec<_>>());

        let store = reopen(&tmp, RestoreMode::Background);
        store.release();

        assert!(store.is_restored());
        assert!(store.is_released());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 200);
    }
}
