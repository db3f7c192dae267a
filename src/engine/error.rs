//! Redefinition errors.
//!
//! Never abort a whole generation: each one becomes a per-unit outcome.

use thiserror::Error;

use crate::core::{FailureCause, UnitName};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedefinitionError {
    #[error("incompatible change to {unit}: {detail}")]
    IncompatibleChange { unit: UnitName, detail: String },

    #[error("unit {0} is not loaded")]
    UnitNotFound(UnitName),

    #[error("runtime rejected {unit}: {detail}")]
    RejectedByRuntime { unit: UnitName, detail: String },
}

impl From<RedefinitionError> for FailureCause {
    fn from(err: RedefinitionError) -> Self {
        match err {
            RedefinitionError::IncompatibleChange { detail, .. } => Self::Incompatible { detail },
            RedefinitionError::UnitNotFound(_) => Self::UnitNotFound,
            RedefinitionError::RejectedByRuntime { detail, .. } => Self::RejectedByRuntime { detail },
        }
    }
}
