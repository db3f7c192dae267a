//! Sustained-incompatibility tracking.

use crate::core::Outcome;

/// Counts consecutive `Failed(Incompatible)` outcomes for one application.
///
/// Skipped units leave the streak untouched; any other outcome resets it.
/// Once the threshold is reached the streak latches until the process
/// restarts.
#[derive(Debug, Clone)]
pub struct IncompatibleStreak {
    threshold: u32,
    consecutive: u32,
    escalated: bool,
}

impl IncompatibleStreak {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
            escalated: false,
        }
    }

    /// Feed one batch of outcomes in unit order.
    ///
    /// Returns `true` only for the batch that crosses the threshold.
    pub fn record<'a>(&mut self, outcomes: impl IntoIterator<Item = &'a Outcome>) -> bool {
        if self.escalated {
            return false;
        }
        for outcome in outcomes {
            match outcome {
                Outcome::Skipped { .. } => {}
                o if o.is_incompatible() => self.consecutive += 1,
                _ => self.consecutive = 0,
            }
            if self.consecutive >= self.threshold {
                self.escalated = true;
                return true;
            }
        }
        false
    }

    #[inline]
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    #[inline]
    pub fn is_escalated(&self) -> bool {
        self.escalated
    }
}
