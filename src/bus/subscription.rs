//! Subscriber streams.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::message::Message;

/// Filter evaluated under the registry lock. Must not call back into the bus.
pub(super) type Predicate = Box<dyn Fn(&Message) -> bool + Send + Sync>;

pub(super) struct Subscriber {
    predicate: Predicate,
    tx: mpsc::UnboundedSender<Message>,
}

impl Subscriber {
    pub(super) fn new(predicate: Predicate, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { predicate, tx }
    }

    /// Deliver if the predicate matches. Returns false once the stream was dropped.
    pub(super) fn offer(&self, message: &Message) -> bool {
        if self.tx.is_closed() {
            return false;
        }
        if (self.predicate)(message) {
            return self.tx.send(message.clone()).is_ok();
        }
        true
    }
}

/// Result of a non-blocking poll.
#[derive(Debug)]
pub enum Polled {
    Message(Message),
    Empty,
    /// The bus shut down and every buffered message was consumed.
    Ended,
}

/// Ordered stream of messages matching one predicate.
///
/// Unbounded and infinite until the bus shuts down, then finite: buffered
/// messages drain and `recv` returns `None`. Each `Bus::subscribe` call starts
/// a fresh stream from that point on.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub(super) fn new(rx: mpsc::UnboundedReceiver<Message>) -> Self {
        Self { rx }
    }

    /// Wait for the next message.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Poll without waiting (for blocking bridge threads).
    pub fn poll_next(&mut self) -> Polled {
        match self.rx.try_recv() {
            Ok(message) => Polled::Message(message),
            Err(TryRecvError::Empty) => Polled::Empty,
            Err(TryRecvError::Disconnected) => Polled::Ended,
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}
