//! Reload Coordinator
//!
//! Turns artifact changes into reload generations for one application
//! session and tracks each generation until its outcomes arrive.
//!
//! ```text
//! FsActor ──WatchEvent──> Debouncer ──quiet/BuildComplete──> read + hash
//!                                                              │
//!      History <── outcomes / timeout / cancel <── send_to(app) ┘
//! ```
//!
//! One generation is in flight at a time. Changes arriving while it is
//! in flight accumulate for the next one.
//!
//! Watch I/O failures are counted per path. A change seen below a failing
//! path clears its count; reaching the retry policy's attempts is fatal.

mod artifact;
mod debouncer;
mod error;
mod history;
mod ledger;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use crate::actor::fs::{ChangeKind, WatchEvent};
use crate::bus::{Bus, Payload, Subscription};
use crate::config::ReloadConfig;
use crate::core::{
    ContentHash, FailureCause, GenerationId, GenerationStatus, Outcome, OutcomeEntry, Role,
    SessionId, UnitChange, UnitName, UpdateUnit,
};
use crate::logger::{status_error, status_success, status_unchanged, status_warning};
use crate::utils::retry::RetryPolicy;

use debouncer::{Debouncer, correct_by_existence};

pub use artifact::ArtifactWiring;
pub use error::CoordinatorError;
pub use history::{GenerationRecord, History};
pub use ledger::HashLedger;

/// Timing taken from `[watch]`.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub quiet: Duration,
    pub outcome_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            quiet: Duration::from_millis(300),
            outcome_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &ReloadConfig) -> Self {
        Self {
            quiet: config.watch.debounce(),
            outcome_timeout: config.watch.outcome_timeout(),
            retry: config.watch.retry_policy(),
        }
    }
}

/// A batch on the wire, waiting for its outcomes.
struct InFlight {
    id: GenerationId,
    sent: Vec<(UnitName, ContentHash)>,
}

pub struct ReloadCoordinator {
    bus: Bus,
    /// Our own Compiler session
    session: SessionId,
    /// The application receiving generations
    target: SessionId,
    wiring: ArtifactWiring,
    settings: CoordinatorSettings,
    ledger: HashLedger,
    history: History,
    next_id: GenerationId,
    inbox: Subscription,
    debouncer: Debouncer,
    events_open: bool,
    /// Watch failure seen while a generation was in flight
    deferred: Option<CoordinatorError>,
    /// Consecutive watch failures per path
    failures: FxHashMap<PathBuf, u32>,
    /// Baseline scan failures, replayed when `run` starts
    pending: Vec<WatchEvent>,
}

impl ReloadCoordinator {
    /// Connect a Compiler session that feeds `target`, recording the current
    /// artifacts as the baseline.
    pub fn attach(
        bus: &Bus,
        target: SessionId,
        wiring: ArtifactWiring,
        settings: CoordinatorSettings,
    ) -> Result<Self, CoordinatorError> {
        let inbox = bus.subscribe(move |m| match &m.payload {
            Payload::BuildComplete => true,
            Payload::ReloadOutcomeBatch { .. } => m.is_from(target),
            _ => false,
        });
        let session = bus.connect(Role::Compiler)?;

        let ledger = HashLedger::new();
        let scan = wiring.scan();
        let seeded = ledger.seed(&scan.units);
        crate::debug!("reload"; "{} feeds {}, baseline {} units", session, target, seeded);
        let pending = scan
            .errors
            .iter()
            .map(|(path, e)| WatchEvent::from_io_error(path.clone(), e))
            .collect();

        Ok(Self {
            bus: bus.clone(),
            session,
            target,
            settings,
            ledger,
            history: History::new(),
            next_id: GenerationId::FIRST,
            inbox,
            debouncer: Debouncer::new(settings.quiet),
            events_open: true,
            deferred: None,
            failures: FxHashMap::default(),
            pending,
            wiring,
        })
    }

    #[inline]
    pub fn session(&self) -> SessionId {
        self.session
    }

    #[inline]
    pub fn target(&self) -> SessionId {
        self.target
    }

    /// Shared handle to the generation history.
    pub fn history(&self) -> History {
        self.history.clone()
    }

    pub fn ledger(&self) -> &HashLedger {
        &self.ledger
    }

    /// Drive generations until the watcher stops or the bus shuts down.
    ///
    /// Fails when the target application leaves, a watch root stays missing,
    /// or watching or reading an artifact keeps failing.
    pub async fn run(mut self, mut events: mpsc::Receiver<WatchEvent>) -> Result<(), CoordinatorError> {
        let closed = self.bus.closed(self.target);
        tokio::pin!(closed);

        let result = loop {
            if !self.events_open {
                break Ok(());
            }
            if let Some(event) = self.pending.pop() {
                if let Err(e) = self.on_watch_event(event) {
                    break Err(e);
                }
                continue;
            }

            tokio::select! {
                biased;

                _ = &mut closed => break self.target_gone(),

                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.on_watch_event(event) {
                            break Err(e);
                        }
                    }
                    None => break Ok(()),
                },

                message = self.inbox.recv() => match message.map(|m| m.payload) {
                    Some(Payload::BuildComplete) => {
                        if let Some(changes) = self.debouncer.take_now() {
                            crate::debug!("reload"; "build complete, flushing early");
                            if let Err(e) = self.generation(changes, &mut events).await {
                                break Err(e);
                            }
                        }
                    }
                    Some(Payload::ReloadOutcomeBatch { generation_id, .. }) => {
                        crate::debug!("reload"; "late outcomes for {}", generation_id);
                    }
                    Some(_) => {}
                    None => break Ok(()),
                },

                _ = tokio::time::sleep(self.debouncer.sleep_duration()) => {
                    if let Some(changes) = self.debouncer.take_if_ready()
                        && let Err(e) = self.generation(changes, &mut events).await
                    {
                        break Err(e);
                    }
                }
            }
        };

        let _ = self.bus.disconnect(self.session, crate::bus::CloseReason::Normal);
        crate::debug!("reload"; "{} stopped", self.session);
        result
    }

    fn on_watch_event(&mut self, event: WatchEvent) -> Result<(), CoordinatorError> {
        match event {
            WatchEvent::Changed { path, kind } => {
                if !self.failures.is_empty() {
                    self.failures.retain(|failed, _| !path.starts_with(failed));
                }
                self.debouncer.add(path, kind);
                Ok(())
            }
            WatchEvent::RootTimedOut { root, missing_for } => {
                let reason = format!("missing for {}s", missing_for.as_secs());
                self.report_watch_failure(&root, &reason);
                Err(CoordinatorError::WatchTimeout { root, missing_for })
            }
            WatchEvent::Failed { path, kind, detail } => self.on_watch_failure(path, kind, detail),
        }
    }

    fn on_watch_failure(
        &mut self,
        path: PathBuf,
        kind: io::ErrorKind,
        detail: String,
    ) -> Result<(), CoordinatorError> {
        let limit = self.settings.retry.attempts;
        let attempts = self.failures.entry(path.clone()).or_default();
        *attempts += 1;
        let attempts = *attempts;

        if attempts < limit {
            status_warning(&format!(
                "watch error on {} ({}/{}): {}",
                path.display(),
                attempts,
                limit,
                detail
            ));
            return Ok(());
        }

        self.report_watch_failure(&path, &detail);
        Err(CoordinatorError::IoFailure {
            path,
            attempts,
            source: io::Error::new(kind, detail),
        })
    }

    /// Build, send and settle one generation.
    async fn generation(
        &mut self,
        changes: FxHashMap<PathBuf, ChangeKind>,
        events: &mut mpsc::Receiver<WatchEvent>,
    ) -> Result<(), CoordinatorError> {
        let units = self.build_batch(changes).await?;
        if units.is_empty() {
            status_unchanged("no unit changed");
            return Ok(());
        }

        let in_flight = self.dispatch(units)?;
        self.await_outcomes(in_flight, events).await?;

        match self.deferred.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Read every changed artifact and keep the units whose hash moved.
    async fn build_batch(
        &self,
        mut changes: FxHashMap<PathBuf, ChangeKind>,
    ) -> Result<Vec<UpdateUnit>, CoordinatorError> {
        correct_by_existence(&mut changes);

        // Runtimes cannot unload units, so removals are only logged
        let mut paths: Vec<_> = changes
            .into_iter()
            .filter_map(|(path, kind)| {
                if kind == ChangeKind::Removed {
                    crate::debug!("reload"; "removed: {}", path.display());
                    return None;
                }
                Some(path)
            })
            .collect();
        paths.sort();

        let mut batch = BTreeMap::new();
        for path in paths {
            let Some(unit) = self.wiring.unit_for(&path) else {
                continue;
            };

            let content = match self.settings.retry.run(|| fs::read(&path)).await {
                Ok(content) => content,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    crate::debug!("reload"; "vanished before read: {}", path.display());
                    continue;
                }
                Err(e) => {
                    self.report_watch_failure(&path, &e.to_string());
                    return Err(CoordinatorError::IoFailure {
                        path,
                        attempts: self.settings.retry.attempts,
                        source: e,
                    });
                }
            };

            let hash = ContentHash::of(&content);
            if self.ledger.is_unchanged(&unit, &hash) {
                crate::debug!("reload"; "unchanged: {}", unit);
                continue;
            }
            let change = if self.ledger.contains(&unit) {
                UnitChange::Modified
            } else {
                UnitChange::New
            };
            batch.insert(unit.clone(), UpdateUnit::new(unit, content, change));
        }

        Ok(batch.into_values().collect())
    }

    fn dispatch(&mut self, units: Vec<UpdateUnit>) -> Result<InFlight, CoordinatorError> {
        let id = self.next_id;
        self.next_id = id.next();

        let sent: Vec<_> = units
            .iter()
            .map(|u| (u.unit_name.clone(), u.content_hash))
            .collect();
        self.history
            .open(id, sent.iter().map(|(name, _)| name.clone()).collect());

        let payload = Payload::ClassUpdateBatch {
            generation_id: id,
            entries: units,
        };
        if let Err(e) = self.bus.send_to(self.session, self.target, payload) {
            self.history.transition(id, GenerationStatus::Failed);
            return Err(e.into());
        }
        self.history.transition(id, GenerationStatus::Applying);

        crate::debug!("reload"; "sent {} with {} units to {}", id, sent.len(), self.target);
        Ok(InFlight { id, sent })
    }

    /// Wait for the outcomes of `in_flight`. Watch events keep accumulating
    /// for the next generation meanwhile.
    async fn await_outcomes(
        &mut self,
        in_flight: InFlight,
        events: &mut mpsc::Receiver<WatchEvent>,
    ) -> Result<(), CoordinatorError> {
        let deadline = tokio::time::sleep(self.settings.outcome_timeout);
        let closed = self.bus.closed(self.target);
        tokio::pin!(deadline, closed);

        loop {
            tokio::select! {
                biased;

                _ = &mut closed => {
                    self.cancel(&in_flight);
                    return self.target_gone();
                }

                message = self.inbox.recv() => {
                    let Some(message) = message else {
                        self.cancel(&in_flight);
                        return Ok(());
                    };
                    if let Payload::ReloadOutcomeBatch { generation_id, entries } = message.payload {
                        if generation_id == in_flight.id {
                            self.settle(&in_flight, entries);
                            return Ok(());
                        }
                        crate::debug!("reload"; "late outcomes for {}", generation_id);
                    }
                }

                event = events.recv(), if self.events_open => match event {
                    Some(event) => {
                        if let Err(e) = self.on_watch_event(event) {
                            self.deferred.get_or_insert(e);
                        }
                    }
                    None => self.events_open = false,
                },

                _ = &mut deadline => {
                    self.time_out(in_flight.id);
                    return Ok(());
                }
            }
        }
    }

    fn settle(&self, in_flight: &InFlight, entries: Vec<OutcomeEntry>) {
        for entry in entries.iter().filter(|e| e.outcome.is_applied()) {
            if let Some((name, hash)) = in_flight.sent.iter().find(|(n, _)| *n == entry.unit_name) {
                self.ledger.record(name.clone(), *hash);
            }
        }

        let status = GenerationStatus::from_outcomes(entries.iter().map(|e| &e.outcome));
        let applied = entries.iter().filter(|e| e.outcome.is_applied()).count();
        let failures: Vec<_> = entries
            .iter()
            .filter_map(|e| match &e.outcome {
                Outcome::Failed { cause } => Some(format!("  {}: {}", e.unit_name, cause)),
                _ => None,
            })
            .collect();
        self.history.resolve(in_flight.id, status, entries);

        match status {
            GenerationStatus::Applied if applied == 0 => {
                status_unchanged(&format!("{} nothing to apply", in_flight.id));
            }
            GenerationStatus::Applied => {
                status_success(&format!("{} reloaded {} {}", in_flight.id, applied, units(applied)));
            }
            _ => status_error(
                &format!("{} {} ({} applied)", in_flight.id, status, applied),
                &failures.join("\n"),
            ),
        }
    }

    fn time_out(&self, id: GenerationId) {
        if !self.history.transition(id, GenerationStatus::TimedOut) {
            return;
        }
        status_warning(&format!(
            "{} timed out after {:?} waiting for {}",
            id, self.settings.outcome_timeout, self.target
        ));
        if let Err(e) = self
            .bus
            .send(self.session, Payload::GenerationTimedOut { generation_id: id })
        {
            crate::debug!("reload"; "cannot announce timeout: {}", e);
        }
    }

    /// The target left mid-flight: nothing of this batch counts as applied.
    fn cancel(&self, in_flight: &InFlight) {
        let entries: Vec<_> = in_flight
            .sent
            .iter()
            .map(|(name, _)| OutcomeEntry::new(name.clone(), Outcome::failed(FailureCause::Cancelled)))
            .collect();
        self.history
            .resolve(in_flight.id, GenerationStatus::Failed, entries.clone());

        // Observers learn about it like any other outcome batch
        let payload = Payload::ReloadOutcomeBatch {
            generation_id: in_flight.id,
            entries,
        };
        if let Err(e) = self.bus.send(self.session, payload) {
            crate::debug!("reload"; "cannot announce cancellation: {}", e);
        }
    }

    fn target_gone(&self) -> Result<(), CoordinatorError> {
        if self.bus.is_shut_down() {
            return Ok(());
        }
        Err(CoordinatorError::Disconnected(self.target))
    }

    fn report_watch_failure(&self, path: &Path, reason: &str) {
        status_error(&format!("watch failed: {}", path.display()), reason);
        let payload = Payload::WatchFailed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if let Err(e) = self.bus.send(self.session, payload) {
            crate::debug!("reload"; "cannot announce watch failure: {}", e);
        }
    }
}

fn units(n: usize) -> &'static str {
    if n == 1 { "unit" } else { "units" }
}
