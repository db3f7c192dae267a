//! FileSystem Actor
//!
//! Watches the artifact directories and forwards per-file changes to the
//! reload coordinator. Implements the "Watcher-First" pattern: the watcher is
//! attached in `new`, so events raised while the caller seeds its baseline
//! are buffered rather than lost.
//!
//! Architecture:
//! ```text
//! notify (thread) → file_changes (temp filter, renames) → WatchEvent → coordinator
//! ```
//!
//! Watch errors are forwarded as [`WatchEvent::Failed`]; the coordinator
//! decides when they become fatal.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use notify::RecommendedWatcher;
use tokio::sync::mpsc;

use crate::utils::retry::RetryPolicy;

// notify event → per-file changes.
mod events;
// Shared fs event types.
mod types;
// Watch root attach/re-attach lifecycle.
mod watch_roots;

#[cfg(test)]
mod tests;

pub use events::is_temp_file;
pub use types::{ChangeKind, WatchEvent};

use events::file_changes;
use watch_roots::WatchRoots;

/// How often vanished roots are checked.
const MAINTAIN_INTERVAL: Duration = Duration::from_millis(250);

/// FileSystem Actor - watches for file changes
pub struct FsActor {
    /// Channel to receive notify events (sync -> async bridge)
    notify_rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    /// Watcher handle (must be kept alive)
    watcher: RecommendedWatcher,
    /// Watch-root consistency layer (attach/re-attach root directories)
    watch_roots: WatchRoots,
    /// Channel to the reload coordinator
    events_tx: mpsc::Sender<WatchEvent>,
}

impl FsActor {
    /// Create a new FsActor with Watcher-First pattern
    pub fn new(
        roots: Vec<PathBuf>,
        root_timeout: Duration,
        events_tx: mpsc::Sender<WatchEvent>,
    ) -> notify::Result<Self> {
        // notify is sync-only
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })?;

        // Missing roots are attached later by `maintain`
        let mut watch_roots = WatchRoots::new(roots, root_timeout);
        watch_roots.attach_existing(&mut watcher)?;

        Ok(Self {
            notify_rx,
            watcher,
            watch_roots,
            events_tx,
        })
    }

    /// Backoff between re-attach attempts for a recreated root.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.watch_roots.set_retry(retry);
        self
    }

    /// Run the actor event loop until the coordinator goes away.
    pub async fn run(self) {
        let notify_rx = self.notify_rx;
        let events_tx = self.events_tx;
        let mut watcher = self.watcher;
        let mut watch_roots = self.watch_roots;

        let (async_tx, mut async_rx) = mpsc::channel::<notify::Result<notify::Event>>(64);

        // Poll notify events on a plain thread and hand them to the async side
        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                if async_tx.blocking_send(result).is_err() {
                    break; // Receiver dropped
                }
            }
        });

        let mut maintain = tokio::time::interval(MAINTAIN_INTERVAL);
        maintain.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = events_tx.closed() => break,

                event = async_rx.recv() => match event {
                    Some(Ok(event)) => {
                        crate::debug!("watch"; "raw notify: {:?} {:?}", event.kind, event.paths);
                        for (path, kind) in file_changes(&event) {
                            if events_tx.send(WatchEvent::Changed { path, kind }).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        crate::log!("watch"; "notify error: {}", e);
                        let fallback = watch_roots.roots().first().cloned().unwrap_or_default();
                        if events_tx.send(WatchEvent::from_notify_error(&e, &fallback)).await.is_err() {
                            return;
                        }
                    }
                    None => break,
                },

                _ = maintain.tick() => {
                    for report in watch_roots.maintain(&mut watcher, Instant::now()) {
                        if let WatchEvent::RootTimedOut { root, missing_for } = &report {
                            crate::log!("watch"; "{} missing for {:?}", root.display(), missing_for);
                        }
                        if events_tx.send(report).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}
