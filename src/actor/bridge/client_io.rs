//! One bridge client: handshake, then pump frames both ways.

use std::io;
use std::net::TcpStream;
use std::time::Duration;

use tungstenite::WebSocket;
use tungstenite::protocol::Message as WsMessage;

use super::frame::{InboundFrame, OutboundFrame, SequenceCheck};
use crate::bus::{Bus, CloseReason, Payload, Polled, ProtocolError, SessionState};
use crate::core::SessionId;

/// How long a new client may take to say hello.
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);
/// Poll interval of the non-blocking pump.
const PUMP_INTERVAL: Duration = Duration::from_millis(10);

/// Why the pump stopped.
enum Exit {
    /// Client closed the socket cleanly
    Closed,
    /// Bus closed our session (shutdown or disconnect)
    SessionEnded,
    Transport(String),
}

/// Serve one accepted stream until either side goes away.
pub(super) fn serve(bus: Bus, stream: TcpStream) {
    // Keep blocking mode during handshake, switch to non-blocking after
    let _ = stream.set_read_timeout(Some(HELLO_TIMEOUT));
    let mut ws = match tungstenite::accept(stream) {
        Ok(ws) => ws,
        Err(e) => {
            crate::log!("bridge"; "handshake failed: {}", e);
            return;
        }
    };

    let role = match read_hello(&mut ws) {
        Ok(role) => role,
        Err(e) => {
            crate::debug!("bridge"; "rejecting client: {}", e);
            let _ = ws.send(WsMessage::Text(OutboundFrame::protocol(&e).to_json().into()));
            let _ = ws.close(None);
            return;
        }
    };

    // Subscribed before connecting; traffic older than our own hello is dropped
    let mut inbox = bus.subscribe(|_| true);
    let session = match bus.connect(role) {
        Ok(session) => session,
        Err(e) => {
            let _ = ws.send(WsMessage::Text(OutboundFrame::connection(&e).to_json().into()));
            let _ = ws.close(None);
            return;
        }
    };

    let welcome = OutboundFrame::Welcome { session };
    if ws.send(WsMessage::Text(welcome.to_json().into())).is_err()
        || ws.get_ref().set_nonblocking(true).is_err()
    {
        let _ = bus.disconnect(session, transport("welcome not delivered"));
        return;
    }
    crate::debug!("bridge"; "client joined as {} ({})", session, role);

    let exit = pump(&bus, session, &mut ws, &mut inbox);
    match exit {
        Exit::Closed => {
            let _ = bus.disconnect(session, CloseReason::Normal);
        }
        Exit::Transport(detail) => {
            crate::debug!("bridge"; "{} transport error: {}", session, detail);
            let _ = bus.disconnect(session, CloseReason::Transport { detail });
        }
        Exit::SessionEnded => {
            let _ = ws.close(None);
            let _ = ws.flush();
        }
    }
    crate::debug!("bridge"; "{} left", session);
}

/// The first frame must be `hello` with seq 0.
fn read_hello(ws: &mut WebSocket<TcpStream>) -> Result<crate::core::Role, ProtocolError> {
    loop {
        match ws.read() {
            Ok(WsMessage::Text(text)) => {
                let frame = InboundFrame::decode(&text)?;
                SequenceCheck::new().accept(frame.seq)?;
                return match frame.payload {
                    Payload::Hello { role } => Ok(role),
                    other => Err(ProtocolError::Malformed(format!(
                        "expected hello, got `{}`",
                        other.type_tag()
                    ))),
                };
            }
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => continue,
            Ok(_) => return Err(ProtocolError::Malformed("expected a text hello frame".into())),
            Err(e) => return Err(ProtocolError::Malformed(format!("no hello: {e}"))),
        }
    }
}

fn pump(
    bus: &Bus,
    session: SessionId,
    ws: &mut WebSocket<TcpStream>,
    inbox: &mut crate::bus::Subscription,
) -> Exit {
    let mut sequence = SequenceCheck::new();
    // Hello was frame 0
    let _ = sequence.accept(0);
    let mut joined = false;

    loop {
        // bus → client
        loop {
            match inbox.poll_next() {
                Polled::Message(message) => {
                    if !joined {
                        joined = message.is_from(session);
                        continue;
                    }
                    if !message.is_for(session) || message.is_from(session) {
                        continue;
                    }
                    let frame = OutboundFrame::Deliver { message };
                    if let Err(e) = write(ws, frame) {
                        return Exit::Transport(e.to_string());
                    }
                }
                Polled::Empty => break,
                Polled::Ended => return Exit::SessionEnded,
            }
        }
        if bus.state(session) != Some(SessionState::Active) {
            return Exit::SessionEnded;
        }

        // client → bus
        loop {
            match ws.read() {
                Ok(WsMessage::Text(text)) => {
                    if let Some(reply) = forward(bus, session, &mut sequence, &text)
                        && let Err(e) = write(ws, reply)
                    {
                        return Exit::Transport(e.to_string());
                    }
                }
                Ok(WsMessage::Close(_)) => return Exit::Closed,
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return Exit::Closed;
                }
                Err(e) => return Exit::Transport(e.to_string()),
            }
        }

        match ws.flush() {
            Ok(()) => {}
            Err(tungstenite::Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Exit::Transport(e.to_string()),
        }
        std::thread::sleep(PUMP_INTERVAL);
    }
}

/// Put one client frame on the bus. Returns an error frame for the client
/// when the frame is rejected; the connection stays usable.
fn forward(bus: &Bus, session: SessionId, sequence: &mut SequenceCheck, text: &str) -> Option<OutboundFrame> {
    let frame = match InboundFrame::decode(text) {
        Ok(frame) => frame,
        Err(e) => return Some(OutboundFrame::protocol(&e)),
    };
    // A rejected frame never consumes its sequence number
    if let Payload::Hello { .. } = frame.payload {
        return Some(OutboundFrame::protocol(&ProtocolError::Malformed(
            "already said hello".into(),
        )));
    }
    if let Err(e) = sequence.accept(frame.seq) {
        crate::debug!("bridge"; "{}: {}", session, e);
        return Some(OutboundFrame::protocol(&e));
    }

    let sent = match frame.target {
        Some(target) => bus.send_to(session, target, frame.payload),
        None => bus.send(session, frame.payload),
    };
    sent.err().map(|e| OutboundFrame::connection(&e))
}

fn write(ws: &mut WebSocket<TcpStream>, frame: OutboundFrame) -> tungstenite::Result<()> {
    match ws.send(WsMessage::Text(frame.to_json().into())) {
        Ok(()) => Ok(()),
        // Queued; flushed on the next pump round
        Err(tungstenite::Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(e),
    }
}

fn transport(detail: &str) -> CloseReason {
    CloseReason::Transport {
        detail: detail.to_string(),
    }
}
