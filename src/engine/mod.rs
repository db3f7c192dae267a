//! Redefinition Engine
//!
//! In-process agent attached to one application session. Receives update
//! batches addressed to its session, validates and applies them one unit at a
//! time, and reports per-unit outcomes back over the bus.
//!
//! ```text
//! Idle ──batch──> Applying ──> {Applied | PartiallyFailed | Failed} ──> Idle
//! ```
//!
//! Applies are serialized: the engine owns its runtime and processes one
//! batch at a time from a single task. Engines of different sessions run
//! independently.

mod error;
mod escalation;
mod runtime;
mod simulated;


use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::bus::{Bus, ConnectionError, Payload, SessionState, Subscription};
use crate::config::ReloadConfig;
use crate::core::{
    ContentHash, FailureCause, GenerationId, GenerationStatus, Outcome, OutcomeEntry, Role,
    SessionId, SkipReason, UnitName, UpdateUnit,
};

pub use error::RedefinitionError;
pub use escalation::IncompatibleStreak;
pub use runtime::{FieldSlot, RecompositionScope, UiRuntime, UnitRuntime, UnitShape};
pub use simulated::{RecompositionLog, SimulatedRuntime};

/// Tunables taken from `[engine]`.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Consecutive incompatible outcomes before "restart required".
    pub restart_threshold: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            restart_threshold: 3,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &ReloadConfig) -> Self {
        Self {
            restart_threshold: config.engine.restart_threshold,
        }
    }
}

/// Engine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    Applying,
    /// Sustained incompatibility; every later batch is rejected.
    RestartRequired,
}

/// Result of processing one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    pub generation_id: GenerationId,
    /// One entry per submitted unit, in submission order.
    pub entries: Vec<OutcomeEntry>,
    pub status: GenerationStatus,
    /// This batch pushed the incompatibility streak over the threshold.
    pub escalated: bool,
}

impl GenerationReport {
    pub fn applied_units(&self) -> Vec<UnitName> {
        self.entries
            .iter()
            .filter(|e| e.outcome.is_applied())
            .map(|e| e.unit_name.clone())
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }
}

/// A unit that passed validation and is waiting to be applied.
struct Planned {
    index: usize,
    unit: UpdateUnit,
}

pub struct RedefinitionEngine<R: UnitRuntime> {
    bus: Bus,
    session: SessionId,
    runtime: R,
    ui: Arc<dyn UiRuntime>,
    inbox: Subscription,
    /// Hash of the last applied content per unit
    applied: FxHashMap<UnitName, ContentHash>,
    last_generation: Option<GenerationId>,
    streak: IncompatibleStreak,
    phase: EnginePhase,
}

impl<R: UnitRuntime> RedefinitionEngine<R> {
    /// Connect an application session for `runtime` and start listening.
    pub fn attach(
        bus: &Bus,
        runtime: R,
        ui: Arc<dyn UiRuntime>,
        settings: EngineSettings,
    ) -> Result<Self, ConnectionError> {
        // Subscribe before connecting so nothing addressed to us is missed;
        // `run` drops batches aimed at other sessions.
        let inbox = bus.subscribe(|m| {
            m.target.is_some() && matches!(m.payload, Payload::ClassUpdateBatch { .. })
        });
        let session = bus.connect(Role::Application)?;
        crate::debug!("engine"; "attached as {}", session);

        Ok(Self {
            bus: bus.clone(),
            session,
            runtime,
            ui,
            inbox,
            applied: FxHashMap::default(),
            last_generation: None,
            streak: IncompatibleStreak::new(settings.restart_threshold),
            phase: EnginePhase::Idle,
        })
    }

    #[inline]
    pub fn session(&self) -> SessionId {
        self.session
    }

    #[inline]
    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Handle batches until the session closes or the bus shuts down.
    pub async fn run(mut self) {
        let closed = self.bus.closed(self.session);
        tokio::pin!(closed);

        loop {
            tokio::select! {
                biased;

                _ = &mut closed => break,

                message = self.inbox.recv() => {
                    let Some(message) = message else { break };
                    if message.target != Some(self.session) {
                        continue;
                    }
                    let Payload::ClassUpdateBatch { generation_id, entries } = message.payload else {
                        continue;
                    };

                    let report = self.process(generation_id, entries);
                    if let Err(e) = self.publish(&report) {
                        crate::debug!("engine"; "cannot report {}: {}", generation_id, e);
                        break;
                    }
                }
            }
        }

        crate::debug!("engine"; "{} detached", self.session);
    }

    /// Validate and apply one batch. Never fails as a whole: every problem
    /// becomes the outcome of the unit it belongs to.
    pub fn process(&mut self, generation_id: GenerationId, units: Vec<UpdateUnit>) -> GenerationReport {
        if self.phase == EnginePhase::RestartRequired {
            return self.reject_all(generation_id, &units, FailureCause::RestartRequired);
        }
        if self.last_generation.is_some_and(|last| generation_id <= last) {
            crate::debug!("engine"; "stale generation {} (last {:?})", generation_id, self.last_generation);
            return self.reject_all(generation_id, &units, FailureCause::StaleGeneration);
        }

        self.phase = EnginePhase::Applying;
        self.last_generation = Some(generation_id);

        let mut outcomes: Vec<Option<Outcome>> = vec![None; units.len()];
        let mut plan = Vec::with_capacity(units.len());
        for (index, unit) in units.iter().enumerate() {
            match self.validate(unit) {
                Ok(None) => plan.push(Planned {
                    index,
                    unit: unit.clone(),
                }),
                Ok(Some(skip)) => outcomes[index] = Some(skip),
                Err(e) => {
                    crate::debug!("engine"; "{}", e);
                    outcomes[index] = Some(Outcome::failed(e.into()));
                }
            }
        }

        for Planned { index, unit } in plan {
            // Not atomic: earlier units stay applied when a later one fails
            outcomes[index] = Some(if self.session_closed() {
                Outcome::failed(FailureCause::Cancelled)
            } else {
                self.apply(unit)
            });
        }

        let entries: Vec<_> = units
            .into_iter()
            .zip(outcomes)
            .map(|(unit, outcome)| {
                let outcome = outcome.unwrap_or(Outcome::failed(FailureCause::Cancelled));
                OutcomeEntry::new(unit.unit_name, outcome)
            })
            .collect();
        let status = GenerationStatus::from_outcomes(entries.iter().map(|e| &e.outcome));

        let escalated = self.streak.record(entries.iter().map(|e| &e.outcome));
        self.phase = if escalated {
            crate::log!("engine"; "restart required after {} incompatible changes", self.streak.consecutive());
            EnginePhase::RestartRequired
        } else {
            EnginePhase::Idle
        };

        crate::debug!("engine"; "{} {}: {} units", generation_id, status, entries.len());
        GenerationReport {
            generation_id,
            entries,
            status,
            escalated,
        }
    }

    /// `Ok(None)` means "apply it".
    fn validate(&self, unit: &UpdateUnit) -> Result<Option<Outcome>, RedefinitionError> {
        let name = &unit.unit_name;
        if self.applied.get(name) == Some(&unit.content_hash) {
            return Ok(Some(Outcome::Skipped {
                reason: SkipReason::Unchanged,
            }));
        }

        let Some(loaded) = self.runtime.loaded_shape(name) else {
            if unit.is_new() {
                // Still parse so malformed content is rejected before apply
                self.runtime.read_shape(name, &unit.content)?;
                return Ok(None);
            }
            return Err(RedefinitionError::UnitNotFound(name.clone()));
        };

        let proposed = self.runtime.read_shape(name, &unit.content)?;
        match loaded.incompatibility(&proposed) {
            Some(detail) => Err(RedefinitionError::IncompatibleChange {
                unit: name.clone(),
                detail,
            }),
            None => Ok(None),
        }
    }

    fn apply(&mut self, unit: UpdateUnit) -> Outcome {
        match self.runtime.apply(&unit.unit_name, &unit.content) {
            Ok(()) => {
                self.applied.insert(unit.unit_name, unit.content_hash);
                Outcome::Applied
            }
            Err(e) => {
                crate::debug!("engine"; "{}", e);
                Outcome::failed(e.into())
            }
        }
    }

    fn reject_all(
        &mut self,
        generation_id: GenerationId,
        units: &[UpdateUnit],
        cause: FailureCause,
    ) -> GenerationReport {
        let entries: Vec<_> = units
            .iter()
            .map(|u| OutcomeEntry::new(u.unit_name.clone(), Outcome::failed(cause.clone())))
            .collect();
        GenerationReport {
            generation_id,
            status: GenerationStatus::from_outcomes(entries.iter().map(|e| &e.outcome)),
            entries,
            escalated: false,
        }
    }

    fn session_closed(&self) -> bool {
        self.bus.state(self.session) != Some(SessionState::Active)
    }

    /// Report outcomes, then the side effects they imply.
    fn publish(&self, report: &GenerationReport) -> Result<(), ConnectionError> {
        self.bus.send(
            self.session,
            Payload::ReloadOutcomeBatch {
                generation_id: report.generation_id,
                entries: report.entries.clone(),
            },
        )?;

        let applied = report.applied_units();
        if !applied.is_empty() {
            self.ui.request_recomposition(&RecompositionScope {
                generation: report.generation_id,
                units: applied,
            });
            self.bus.send(
                self.session,
                Payload::RecompositionRequested {
                    generation_id: report.generation_id,
                },
            )?;
        }

        if report.escalated {
            self.bus.send(
                self.session,
                Payload::RestartRequired {
                    generation_id: report.generation_id,
                    consecutive: self.streak.consecutive(),
                },
            )?;
        }
        Ok(())
    }
}
