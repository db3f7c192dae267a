use std::path::PathBuf;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::actor::fs::ChangeKind;

/// Collects changes until the quiet period passes without a new one.
///
/// Pure: only handles timing and event folding. No business logic.
pub(super) struct Debouncer {
    /// Path → ChangeKind (dedup is free via HashMap key uniqueness)
    pub(super) changes: FxHashMap<PathBuf, ChangeKind>,
    last_event: Option<Instant>,
    quiet: Duration,
}

impl Debouncer {
    pub(super) fn new(quiet: Duration) -> Self {
        Self {
            changes: FxHashMap::default(),
            last_event: None,
            quiet,
        }
    }

    /// Record one change and restart the quiet period.
    ///
    /// Folding within one window:
    /// - Removed + Created/Modified → Modified (file was restored)
    /// - Modified + Removed → Removed
    /// - Created + Removed → dropped (appeared then vanished)
    /// - otherwise the first kind wins
    pub(super) fn add(&mut self, path: PathBuf, kind: ChangeKind) {
        self.last_event = Some(Instant::now());

        let Some(&existing) = self.changes.get(&path) else {
            crate::debug!("reload"; "event {}: {}", kind.label(), path.display());
            self.changes.insert(path, kind);
            return;
        };

        match (existing, kind) {
            (ChangeKind::Removed, ChangeKind::Created | ChangeKind::Modified) => {
                crate::debug!("reload"; "restore removed->modified: {}", path.display());
                self.changes.insert(path, ChangeKind::Modified);
            }
            (ChangeKind::Modified, ChangeKind::Removed) => {
                crate::debug!("reload"; "upgrade modified->removed: {}", path.display());
                self.changes.insert(path, ChangeKind::Removed);
            }
            (ChangeKind::Created, ChangeKind::Removed) => {
                crate::debug!("reload"; "discard created+removed: {}", path.display());
                self.changes.remove(&path);
                if self.changes.is_empty() {
                    // Nothing left to wait for
                    self.last_event = None;
                }
            }
            _ => {}
        }
    }

    pub(super) fn is_ready(&self) -> bool {
        let Some(last_event) = self.last_event else {
            return false;
        };
        last_event.elapsed() >= self.quiet && !self.changes.is_empty()
    }

    /// Take accumulated changes if the quiet period has elapsed.
    pub(super) fn take_if_ready(&mut self) -> Option<FxHashMap<PathBuf, ChangeKind>> {
        if self.changes.is_empty() {
            self.last_event = None;
            return None;
        }
        if !self.is_ready() {
            return None;
        }
        self.take_now()
    }

    /// Take accumulated changes regardless of timing (build complete).
    pub(super) fn take_now(&mut self) -> Option<FxHashMap<PathBuf, ChangeKind>> {
        self.last_event = None;
        let changes = std::mem::take(&mut self.changes);
        (!changes.is_empty()).then_some(changes)
    }

    /// Precise sleep duration until the quiet period can have elapsed.
    pub(super) fn sleep_duration(&self) -> Duration {
        let Some(last_event) = self.last_event else {
            return Duration::from_secs(86400);
        };

        self.quiet
            .saturating_sub(last_event.elapsed())
            .max(Duration::from_millis(1))
    }
}

/// Reconcile event kinds with actual filesystem state.
///
/// The watcher may report stale events (e.g. Created for a file that is
/// already gone, or Removed for a file that still exists after an atomic save).
pub(super) fn correct_by_existence(changes: &mut FxHashMap<PathBuf, ChangeKind>) {
    for (path, kind) in changes.iter_mut() {
        let exists = path.is_file();
        match *kind {
            ChangeKind::Created | ChangeKind::Modified if !exists => {
                crate::debug!("reload"; "gone since {}: {}", kind.label(), path.display());
                *kind = ChangeKind::Removed;
            }
            ChangeKind::Removed if exists => {
                crate::debug!("reload"; "downgrade removed->modified: {}", path.display());
                *kind = ChangeKind::Modified;
            }
            _ => {}
        }
    }
}
