//! Bus and wire errors.

use thiserror::Error;

use crate::core::SessionId;

/// Failures of a single connect/send/receive call.
///
/// The bus stays usable for every other session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("session {0} is not connected")]
    NotConnected(SessionId),

    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    #[error("bus is shutting down")]
    AlreadyClosed,
}

/// Malformed traffic from an out-of-process participant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("out of order message: expected seq {expected}, got {actual}")]
    OutOfOrderMessage { expected: u64, actual: u64 },

    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),

    #[error("malformed frame: {0}")]
    Malformed(String),
}
