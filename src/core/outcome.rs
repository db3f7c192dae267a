//! Per-unit outcomes and generation status.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::UnitName;

/// Why a unit was not applied even though nothing went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Same content hash as the last applied version.
    Unchanged,
}

/// Why a unit could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// Shape change the live process cannot tolerate.
    Incompatible { detail: String },
    /// Unit is not loaded and was not flagged new.
    UnitNotFound,
    /// The runtime refused the new content.
    RejectedByRuntime { detail: String },
    /// The owning session closed before the batch completed.
    Cancelled,
    /// Generation id not greater than the last processed one.
    StaleGeneration,
    /// The application needs a restart before accepting updates.
    RestartRequired,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incompatible { detail } => write!(f, "incompatible: {detail}"),
            Self::UnitNotFound => f.write_str("unit not loaded"),
            Self::RejectedByRuntime { detail } => write!(f, "rejected by runtime: {detail}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::StaleGeneration => f.write_str("stale generation"),
            Self::RestartRequired => f.write_str("restart required"),
        }
    }
}

/// Result of offering one unit to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    Skipped { reason: SkipReason },
    Failed { cause: FailureCause },
}

impl Outcome {
    pub fn failed(cause: FailureCause) -> Self {
        Self::Failed { cause }
    }

    #[inline]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    #[inline]
    pub fn is_incompatible(&self) -> bool {
        matches!(
            self,
            Self::Failed {
                cause: FailureCause::Incompatible { .. }
            }
        )
    }
}

/// Outcome tagged with the unit it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeEntry {
    pub unit_name: UnitName,
    pub outcome: Outcome,
}

impl OutcomeEntry {
    pub fn new(unit_name: UnitName, outcome: Outcome) -> Self {
        Self { unit_name, outcome }
    }
}

/// Lifecycle of a reload generation.
///
/// `Pending → Applying → {Applied, PartiallyFailed, Failed, TimedOut}`.
/// Terminal states never move again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Applying,
    Applied,
    PartiallyFailed,
    Failed,
    TimedOut,
}

impl GenerationStatus {
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Applying)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_become(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Applying) => true,
            // A batch cancelled before it was ever sent
            (Self::Pending, Self::Failed) => true,
            (Self::Applying, next) => next.is_terminal(),
            _ => false,
        }
    }

    /// Derive the overall status of a batch from its unit outcomes.
    ///
    /// Skipped units count as neither success nor failure. A batch with no
    /// failures is `Applied`; failures next to at least one applied unit give
    /// `PartiallyFailed`; failures with nothing applied give `Failed`.
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a Outcome>) -> Self {
        let mut applied = 0usize;
        let mut failed = 0usize;
        for outcome in outcomes {
            match outcome {
                Outcome::Applied => applied += 1,
                Outcome::Failed { .. } => failed += 1,
                Outcome::Skipped { .. } => {}
            }
        }
        match (applied, failed) {
            (_, 0) => Self::Applied,
            (0, _) => Self::Failed,
            _ => Self::PartiallyFailed,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::PartiallyFailed => "partially failed",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
        }
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incompatible() -> Outcome {
        Outcome::failed(FailureCause::Incompatible {
            detail: "supertype changed".into(),
        })
    }

    #[test]
    fn test_status_from_outcomes() {
        use GenerationStatus::*;

        assert_eq!(
            GenerationStatus::from_outcomes(&[Outcome::Applied, Outcome::Applied]),
            Applied
        );
        assert_eq!(
            GenerationStatus::from_outcomes(&[Outcome::Applied, incompatible(), Outcome::Applied]),
            PartiallyFailed
        );
        assert_eq!(
            GenerationStatus::from_outcomes(&[incompatible(), incompatible()]),
            Failed
        );
        let skipped = Outcome::Skipped {
            reason: SkipReason::Unchanged,
        };
        assert_eq!(GenerationStatus::from_outcomes(&[skipped.clone()]), Applied);
        assert_eq!(
            GenerationStatus::from_outcomes(&[skipped, incompatible()]),
            Failed
        );
    }

    #[test]
    fn test_terminal_states_are_final() {
        use GenerationStatus::*;

        for terminal in [Applied, PartiallyFailed, Failed, TimedOut] {
            assert!(terminal.is_terminal());
            for next in [Pending, Applying, Applied, PartiallyFailed, Failed, TimedOut] {
                assert!(!terminal.can_become(next), "{terminal} -> {next}");
            }
        }
        assert!(Pending.can_become(Applying));
        assert!(Applying.can_become(TimedOut));
        assert!(!Applying.can_become(Pending));
        assert!(!Pending.can_become(Applied));
    }

    #[test]
    fn test_outcome_wire_shape() {
        let json = serde_json::to_value(incompatible()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["cause"]["kind"], "incompatible");

        let json = serde_json::to_value(Outcome::Applied).unwrap();
        assert_eq!(json["status"], "applied");
    }
}
