use std::path::PathBuf;
use std::time::{Duration, Instant};

use notify::{RecursiveMode, Watcher};
use rustc_hash::{FxHashMap, FxHashSet};

use super::types::WatchEvent;
use crate::utils::retry::RetryPolicy;

/// Watch-root consistency manager.
///
/// Responsibility:
/// - Attach existing roots at startup
/// - Re-attach roots that were removed and recreated
/// - Report roots that stay gone longer than the timeout (once each)
/// - Report failed re-attaches, retrying with backoff
///
/// Roots that never existed are waited for without a deadline.
pub(super) struct WatchRoots {
    desired: Vec<PathBuf>,
    attached: FxHashSet<PathBuf>,
    /// Roots that disappeared after being attached, with the time they did
    lost_since: FxHashMap<PathBuf, Instant>,
    timed_out: FxHashSet<PathBuf>,
    timeout: Duration,
    /// Failed re-attaches so far and when the next try is due
    backoff: FxHashMap<PathBuf, (u32, Instant)>,
    retry: RetryPolicy,
}

impl WatchRoots {
    pub(super) fn new(paths: Vec<PathBuf>, timeout: Duration) -> Self {
        Self {
            desired: paths,
            attached: FxHashSet::default(),
            lost_since: FxHashMap::default(),
            timed_out: FxHashSet::default(),
            timeout,
            backoff: FxHashMap::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub(super) fn set_retry(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub(super) fn roots(&self) -> &[PathBuf] {
        &self.desired
    }

    pub(super) fn attach_existing<W: Watcher>(&mut self, watcher: &mut W) -> notify::Result<()> {
        for path in &self.desired {
            if !path.exists() {
                crate::debug!("watch"; "waiting for {}", path.display());
                continue;
            }
            watcher.watch(path, RecursiveMode::Recursive)?;
            self.attached.insert(path.clone());
        }

        Ok(())
    }

    /// Re-attach recreated roots. Reports roots whose absence just exceeded
    /// the timeout, and re-attaches that failed.
    pub(super) fn maintain<W: Watcher>(&mut self, watcher: &mut W, now: Instant) -> Vec<WatchEvent> {
        // Drop stale handles for roots that no longer exist.
        let lost: Vec<_> = self
            .attached
            .iter()
            .filter(|path| !path.exists())
            .cloned()
            .collect();
        for path in lost {
            self.attached.remove(&path);
            let _ = watcher.unwatch(&path);
            crate::debug!("watch"; "root vanished: {}", path.display());
            self.lost_since.insert(path, now);
        }

        let mut reports = Vec::new();
        for path in &self.desired {
            if self.attached.contains(path) || !path.exists() {
                continue;
            }
            if let Some((_, due)) = self.backoff.get(path)
                && now < *due
            {
                continue;
            }

            match watcher.watch(path, RecursiveMode::Recursive) {
                Ok(()) => {
                    self.attached.insert(path.clone());
                    self.lost_since.remove(path);
                    self.timed_out.remove(path);
                    self.backoff.remove(path);
                    crate::debug!("watch"; "re-attached watch: {}", path.display());
                }
                Err(e) => {
                    let failures = self.backoff.get(path).map_or(0, |(n, _)| *n);
                    let delay = self.retry.delay(failures);
                    crate::debug!("watch"; "attach {} failed ({}), next try in {:?}", path.display(), e, delay);
                    self.backoff.insert(path.clone(), (failures + 1, now + delay));
                    reports.push(WatchEvent::from_notify_error(&e, path));
                }
            }
        }

        for (path, since) in &self.lost_since {
            let missing_for = now.saturating_duration_since(*since);
            if missing_for >= self.timeout && !self.timed_out.contains(path) {
                reports.push(WatchEvent::RootTimedOut {
                    root: path.clone(),
                    missing_for,
                });
            }
        }
        for report in &reports {
            if let WatchEvent::RootTimedOut { root, .. } = report {
                self.timed_out.insert(root.clone());
            }
        }
        reports
    }

    pub(super) fn is_attached(&self, path: &std::path::Path) -> bool {
        self.attached.contains(path)
    }
}
