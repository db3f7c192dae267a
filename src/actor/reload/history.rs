//! Generation history, kept for the process lifetime.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::core::{GenerationId, GenerationStatus, OutcomeEntry, UnitName};

#[derive(Debug, Clone)]
pub struct GenerationRecord {
    pub id: GenerationId,
    pub created: Instant,
    /// Units in the order they were sent.
    pub units: Vec<UnitName>,
    pub status: GenerationStatus,
    /// Empty until the application reports (or the batch is cancelled).
    pub outcomes: Vec<OutcomeEntry>,
}

/// Shared, cloneable view of every generation sent for one application.
#[derive(Debug, Clone, Default)]
pub struct History {
    records: Arc<Mutex<Vec<GenerationRecord>>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly built generation as `Pending`.
    pub(super) fn open(&self, id: GenerationId, units: Vec<UnitName>) {
        self.records.lock().push(GenerationRecord {
            id,
            created: Instant::now(),
            units,
            status: GenerationStatus::Pending,
            outcomes: Vec::new(),
        });
    }

    /// Move generation `id` to `next`. Illegal transitions (anything out of
    /// a terminal state) are ignored and reported as `false`.
    pub(super) fn transition(&self, id: GenerationId, next: GenerationStatus) -> bool {
        let mut records = self.records.lock();
        let Some(record) = records.iter_mut().rev().find(|r| r.id == id) else {
            return false;
        };
        if !record.status.can_become(next) {
            crate::debug!("reload"; "ignoring {} {} -> {}", id, record.status, next);
            return false;
        }
        record.status = next;
        true
    }

    /// Finish generation `id` with its outcomes.
    pub(super) fn resolve(
        &self,
        id: GenerationId,
        status: GenerationStatus,
        outcomes: Vec<OutcomeEntry>,
    ) -> bool {
        if !self.transition(id, status) {
            return false;
        }
        let mut records = self.records.lock();
        if let Some(record) = records.iter_mut().rev().find(|r| r.id == id) {
            record.outcomes = outcomes;
        }
        true
    }

    pub fn get(&self, id: GenerationId) -> Option<GenerationRecord> {
        self.records.lock().iter().find(|r| r.id == id).cloned()
    }

    pub fn last(&self) -> Option<GenerationRecord> {
        self.records.lock().last().cloned()
    }

    pub fn snapshot(&self) -> Vec<GenerationRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
