//! Core types - pure abstractions shared across the codebase.

mod hash;
mod id;
mod outcome;
mod role;
mod state;
mod topology;
mod unit;

pub use hash::ContentHash;
pub use id::{GenerationId, SessionId, UnitName};
pub use outcome::{FailureCause, GenerationStatus, Outcome, OutcomeEntry, SkipReason};
pub use role::Role;
pub use state::{is_shutdown, register_shutdown, request_shutdown, setup_shutdown_handler};
pub use topology::Topology;
pub use unit::{UnitChange, UpdateUnit};
