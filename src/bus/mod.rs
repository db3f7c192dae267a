//! Orchestration Bus
//!
//! Session registry plus ordered message routing between the compiler side,
//! running applications and observers.
//!
//! ```text
//! Compiler ──┐                        ┌──> Subscription (coordinator)
//! App ───────┼──> Registry (1 lock) ──┼──> Subscription (engine)
//! Observer ──┘   seq + fan-out        └──> Subscription (status line)
//! ```
//!
//! Sequence assignment and fan-out happen under a single registry lock, so
//! every subscriber observes one session's messages in send order. Callers
//! only ever hold a [`SessionId`]; the entries themselves stay in the registry.
//!
//! Closed entries are dropped. Ids are never reused, so an allocated id
//! without an entry is known to be closed.

mod error;
mod message;
mod session;
mod subscription;


use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use crate::core::{Role, SessionId};

pub use error::{ConnectionError, ProtocolError};
pub use message::{CloseReason, Message, Payload};
pub use session::{SessionInfo, SessionState};
pub use subscription::{Polled, Subscription};

use session::SessionEntry;
use subscription::Subscriber;

/// Cloneable handle to a shared bus.
#[derive(Clone, Default)]
pub struct Bus {
    registry: Arc<Mutex<Registry>>,
}

#[derive(Default)]
struct Registry {
    /// Open sessions only
    sessions: FxHashMap<SessionId, SessionEntry>,
    subscribers: Vec<Subscriber>,
    /// Last allocated session id (0 is reserved for the bus)
    last_id: u64,
    /// Sequence counter for bus-originated messages
    bus_seq: u64,
    shutting_down: bool,
}

impl Registry {
    /// Assign the sender's next sequence number and fan out to subscribers.
    fn publish(&mut self, from: SessionId, target: Option<SessionId>, payload: Payload) -> u64 {
        let seq = if from.is_bus() {
            let seq = self.bus_seq;
            self.bus_seq += 1;
            seq
        } else {
            match self.sessions.get_mut(&from) {
                Some(entry) => entry.take_seq(),
                None => return 0,
            }
        };

        let message = Message {
            session: from,
            seq,
            target,
            payload,
        };
        self.subscribers.retain(|subscriber| subscriber.offer(&message));
        seq
    }

    fn state(&self, session: SessionId) -> Option<SessionState> {
        match self.sessions.get(&session) {
            Some(entry) => Some(entry.state()),
            None if !session.is_bus() && session.get() <= self.last_id => Some(SessionState::Closed),
            None => None,
        }
    }

    fn close(&mut self, session: SessionId, reason: CloseReason) {
        let Some(entry) = self.sessions.remove(&session) else {
            return;
        };
        // Waiters see Closed before the sender goes away
        entry.set_state(SessionState::Closed);
        crate::debug!("bus"; "session {} closed: {}", session, reason);
        self.publish(
            SessionId::BUS,
            None,
            Payload::SessionClosed { session, reason },
        );
    }
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and announce it with `Hello` (its seq 0).
    pub fn connect(&self, role: Role) -> Result<SessionId, ConnectionError> {
        let mut registry = self.registry.lock();
        if registry.shutting_down {
            return Err(ConnectionError::AlreadyClosed);
        }

        registry.last_id += 1;
        let id = SessionId::new(registry.last_id);
        registry.sessions.insert(id, SessionEntry::new(role));

        registry.publish(id, None, Payload::Hello { role });
        if let Some(entry) = registry.sessions.get(&id) {
            entry.set_state(SessionState::Active);
        }

        crate::debug!("bus"; "session {} connected as {}", id, role);
        Ok(id)
    }

    /// Broadcast a payload from `session`. Returns its sequence number.
    pub fn send(&self, session: SessionId, payload: Payload) -> Result<u64, ConnectionError> {
        self.publish(session, None, payload)
    }

    /// Send a payload from `session` addressed to `target`.
    pub fn send_to(
        &self,
        session: SessionId,
        target: SessionId,
        payload: Payload,
    ) -> Result<u64, ConnectionError> {
        self.publish(session, Some(target), payload)
    }

    fn publish(
        &self,
        session: SessionId,
        target: Option<SessionId>,
        payload: Payload,
    ) -> Result<u64, ConnectionError> {
        let mut registry = self.registry.lock();
        match registry.state(session) {
            None => return Err(ConnectionError::NotConnected(session)),
            Some(SessionState::Closed) => return Err(ConnectionError::SessionClosed(session)),
            Some(SessionState::Connecting | SessionState::Active) => {}
        }
        Ok(registry.publish(session, target, payload))
    }

    /// Open a stream of every future message matching `predicate`.
    ///
    /// The predicate runs under the registry lock and must not touch the bus.
    /// After shutdown the returned stream is already finished.
    pub fn subscribe<F>(&self, predicate: F) -> Subscription
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock();
        if !registry.shutting_down {
            registry
                .subscribers
                .push(Subscriber::new(Box::new(predicate), tx));
        }
        Subscription::new(rx)
    }

    /// Mark the session closed and tell everyone else.
    ///
    /// Waiters on [`Bus::closed`] for this session resolve immediately.
    pub fn disconnect(&self, session: SessionId, reason: CloseReason) -> Result<(), ConnectionError> {
        let mut registry = self.registry.lock();
        match registry.state(session) {
            None => Err(ConnectionError::NotConnected(session)),
            Some(SessionState::Closed) => Err(ConnectionError::SessionClosed(session)),
            Some(_) => {
                registry.close(session, reason);
                Ok(())
            }
        }
    }

    /// Resolves once `session` is closed (or unknown).
    pub fn closed(&self, session: SessionId) -> impl Future<Output = ()> + Send + 'static {
        let state_rx = self
            .registry
            .lock()
            .sessions
            .get(&session)
            .map(SessionEntry::watch_state);

        async move {
            if let Some(mut rx) = state_rx {
                // Err means the entry is gone, which is closed as well
                let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
            }
        }
    }

    /// `None` only for ids this bus never handed out.
    pub fn state(&self, session: SessionId) -> Option<SessionState> {
        self.registry.lock().state(session)
    }

    /// Role of an open session.
    pub fn role(&self, session: SessionId) -> Option<Role> {
        self.registry.lock().sessions.get(&session).map(|e| e.role)
    }

    /// Snapshot of open sessions, ordered by id.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let registry = self.registry.lock();
        let mut sessions: Vec<_> = registry
            .sessions
            .iter()
            .map(|(id, entry)| SessionInfo {
                id: *id,
                role: entry.role,
                state: entry.state(),
            })
            .collect();
        sessions.sort_by_key(|info| info.id);
        sessions
    }

    /// Active sessions with the given role, ordered by id.
    pub fn active(&self, role: Role) -> Vec<SessionId> {
        self.sessions()
            .into_iter()
            .filter(|info| info.role == role && info.state == SessionState::Active)
            .map(|info| info.id)
            .collect()
    }

    /// Close every session, end every subscription, refuse new connections.
    pub fn shutdown(&self) {
        let mut registry = self.registry.lock();
        if registry.shutting_down {
            return;
        }
        registry.shutting_down = true;

        let mut open: Vec<_> = registry.sessions.keys().copied().collect();
        open.sort();
        for session in open {
            registry.close(session, CloseReason::BusShutdown);
        }

        // Dropping the senders finishes every stream once drained
        registry.subscribers.clear();
        crate::debug!("bus"; "shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.registry.lock().shutting_down
    }
}
