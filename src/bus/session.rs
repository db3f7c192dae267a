//! Session registry entries.

use std::fmt;

use tokio::sync::watch;

use crate::core::{Role, SessionId};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closed => "closed",
        })
    }
}

/// Snapshot of one session for status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub role: Role,
    pub state: SessionState,
}

/// Registry-owned session record. Never handed out.
pub(super) struct SessionEntry {
    pub(super) role: Role,
    pub(super) next_seq: u64,
    /// Broadcasts state changes to `Bus::closed` waiters
    state_tx: watch::Sender<SessionState>,
}

impl SessionEntry {
    pub(super) fn new(role: Role) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        Self {
            role,
            next_seq: 0,
            state_tx,
        }
    }

    #[inline]
    pub(super) fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub(super) fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    pub(super) fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Take the next outgoing sequence number.
    #[inline]
    pub(super) fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
