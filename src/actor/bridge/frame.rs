//! Bridge wire frames.
//!
//! Client → bridge:
//!
//! ```json
//! { "seq": 3, "target": 1, "message": { "type": "class_update_batch", ... } }
//! ```
//!
//! Bridge → client, tagged by `frame`:
//!
//! ```json
//! { "frame": "welcome", "session": 4 }
//! { "frame": "deliver", "message": { "session": 1, "seq": 7, "payload": { ... } } }
//! { "frame": "error", "kind": "out_of_order_message", "detail": "..." }
//! ```

use serde::{Deserialize, Serialize};

use crate::bus::{ConnectionError, Message, Payload, ProtocolError};
use crate::core::SessionId;

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub seq: u64,
    pub target: Option<SessionId>,
    pub payload: Payload,
}

impl InboundFrame {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let seq = value
            .get("seq")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| ProtocolError::Malformed("missing `seq`".into()))?;
        let target = match value.get("target") {
            None | Some(serde_json::Value::Null) => None,
            Some(raw) => Some(
                raw.as_u64()
                    .map(SessionId::new)
                    .ok_or_else(|| ProtocolError::Malformed("`target` must be a session id".into()))?,
            ),
        };
        let message = value
            .get_mut("message")
            .map(serde_json::Value::take)
            .ok_or_else(|| ProtocolError::Malformed("missing `message`".into()))?;

        Ok(Self {
            seq,
            target,
            payload: Payload::from_value(message)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum OutboundFrame {
    Welcome { session: SessionId },
    Deliver { message: Message },
    Error { kind: String, detail: String },
}

impl OutboundFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn protocol(error: &ProtocolError) -> Self {
        let kind = match error {
            ProtocolError::OutOfOrderMessage { .. } => "out_of_order_message",
            ProtocolError::UnknownMessageType(_) => "unknown_message_type",
            ProtocolError::Malformed(_) => "malformed",
        };
        Self::Error {
            kind: kind.to_string(),
            detail: error.to_string(),
        }
    }

    pub fn connection(error: &ConnectionError) -> Self {
        Self::Error {
            kind: "connection".to_string(),
            detail: error.to_string(),
        }
    }
}

/// Expected next client sequence number.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceCheck {
    expected: u64,
}

impl SequenceCheck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `seq` if it is the next one. A rejected frame does not
    /// advance the counter, so the client can resend it correctly.
    pub fn accept(&mut self, seq: u64) -> Result<(), ProtocolError> {
        if seq != self.expected {
            return Err(ProtocolError::OutOfOrderMessage {
                expected: self.expected,
                actual: seq,
            });
        }
        self.expected += 1;
        Ok(())
    }

    #[inline]
    pub fn expected(&self) -> u64 {
        self.expected
    }
}
