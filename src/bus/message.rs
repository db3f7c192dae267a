//! Bus Message Protocol
//!
//! Envelope plus the closed set of payloads exchanged between compiler,
//! application and observer sessions. The same types are the JSON wire
//! format of the WebSocket bridge.
//!
//! # Message Types
//!
//! - `hello`: handshake on connect
//! - `class_update_batch`: one reload generation (compiler → application)
//! - `reload_outcome_batch`: per-unit outcomes (application → everyone)
//! - `recomposition_requested`: UI re-evaluation after an applied update
//! - `restart_required`: sustained incompatibility, incremental updates stop
//! - `generation_timed_out` / `watch_failed`: coordinator diagnostics
//! - `build_complete`: flush pending changes without waiting for quiet period
//! - `session_closed`: bus-originated departure notice

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::ProtocolError;
use crate::core::{GenerationId, OutcomeEntry, Role, SessionId, UpdateUnit};

/// Why a session left the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloseReason {
    /// Participant disconnected on purpose.
    Normal,
    /// The whole bus is shutting down.
    BusShutdown,
    /// Transport failed underneath the session.
    Transport { detail: String },
    /// Test fixture teardown.
    Teardown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("disconnected"),
            Self::BusShutdown => f.write_str("bus shutdown"),
            Self::Transport { detail } => write!(f, "transport error: {detail}"),
            Self::Teardown => f.write_str("teardown"),
        }
    }
}

/// Message payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Hello {
        role: Role,
    },
    ClassUpdateBatch {
        generation_id: GenerationId,
        entries: Vec<UpdateUnit>,
    },
    ReloadOutcomeBatch {
        generation_id: GenerationId,
        entries: Vec<OutcomeEntry>,
    },
    RecompositionRequested {
        generation_id: GenerationId,
    },
    RestartRequired {
        generation_id: GenerationId,
        consecutive: u32,
    },
    GenerationTimedOut {
        generation_id: GenerationId,
    },
    WatchFailed {
        path: PathBuf,
        reason: String,
    },
    BuildComplete,
    SessionClosed {
        session: SessionId,
        reason: CloseReason,
    },
}

impl Payload {
    /// Every `type` tag this protocol understands.
    pub const TYPE_TAGS: [&'static str; 9] = [
        "hello",
        "class_update_batch",
        "reload_outcome_batch",
        "recomposition_requested",
        "restart_required",
        "generation_timed_out",
        "watch_failed",
        "build_complete",
        "session_closed",
    ];

    /// The payload's `type` tag.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::ClassUpdateBatch { .. } => "class_update_batch",
            Self::ReloadOutcomeBatch { .. } => "reload_outcome_batch",
            Self::RecompositionRequested { .. } => "recomposition_requested",
            Self::RestartRequired { .. } => "restart_required",
            Self::GenerationTimedOut { .. } => "generation_timed_out",
            Self::WatchFailed { .. } => "watch_failed",
            Self::BuildComplete => "build_complete",
            Self::SessionClosed { .. } => "session_closed",
        }
    }

    /// Decode a JSON payload, distinguishing unknown tags from bad shapes.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ProtocolError> {
        let Some(tag) = value.get("type").and_then(|t| t.as_str()) else {
            return Err(ProtocolError::Malformed("missing `type` tag".into()));
        };
        if !Self::TYPE_TAGS.contains(&tag) {
            return Err(ProtocolError::UnknownMessageType(tag.to_string()));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Generation id carried by the payload, if any.
    pub fn generation_id(&self) -> Option<GenerationId> {
        match self {
            Self::ClassUpdateBatch { generation_id, .. }
            | Self::ReloadOutcomeBatch { generation_id, .. }
            | Self::RecompositionRequested { generation_id }
            | Self::RestartRequired { generation_id, .. }
            | Self::GenerationTimedOut { generation_id } => Some(*generation_id),
            _ => None,
        }
    }
}

/// Immutable envelope delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sending session (`SessionId::BUS` for bus-originated messages).
    pub session: SessionId,
    /// Per-session sequence number, strictly increasing from zero.
    pub seq: u64,
    /// Addressed session; `None` is a broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<SessionId>,
    pub payload: Payload,
}

impl Message {
    /// Whether this message is addressed to `session` (directly or by broadcast).
    #[inline]
    pub fn is_for(&self, session: SessionId) -> bool {
        self.target.is_none_or(|target| target == session)
    }

    #[inline]
    pub fn is_from(&self, session: SessionId) -> bool {
        self.session == session
    }
}
