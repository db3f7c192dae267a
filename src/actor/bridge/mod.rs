//! WebSocket bridge for out-of-process participants.
//!
//! ```text
//! client ──hello──> bridge ──connect(role)──> Bus
//!        <─welcome─
//!        ──frames──> SequenceCheck ──send/send_to──> Bus
//!        <─deliver── filter(is_for ∧ ¬is_from) <── Subscription
//! ```
//!
//! One acceptor thread plus one blocking thread per client. Protocol errors
//! are answered with an error frame to that client only.

mod client_io;
mod frame;


use std::net::{IpAddr, SocketAddr, TcpListener};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;

use crate::bus::Bus;

pub use frame::{InboundFrame, OutboundFrame, SequenceCheck};

/// Maximum port retry attempts
const MAX_PORT_RETRIES: u16 = 10;
const ACCEPT_INTERVAL: Duration = Duration::from_millis(50);

/// A running bridge. The acceptor stops once the bus shuts down.
pub struct Bridge {
    addr: SocketAddr,
    acceptor: JoinHandle<()>,
}

impl Bridge {
    /// Bind `interface:port` (or the next free port) and start accepting.
    pub fn start(bus: &Bus, interface: IpAddr, port: u16) -> Result<Self> {
        let (listener, addr) = try_bind_port(interface, port, MAX_PORT_RETRIES)?;
        listener.set_nonblocking(true)?;
        if addr.port() != port && port != 0 {
            crate::log!("bridge"; "port {} in use, using {} instead", port, addr.port());
        }

        let bus = bus.clone();
        let acceptor = thread::Builder::new()
            .name("bridge-accept".into())
            .spawn(move || accept_loop(listener, bus))?;

        crate::debug!("bridge"; "listening on ws://{}", addr);
        Ok(Self { addr, acceptor })
    }

    #[inline]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the acceptor to notice the bus is gone.
    pub fn join(self) {
        let _ = self.acceptor.join();
    }
}

fn accept_loop(listener: TcpListener, bus: Bus) {
    while !bus.is_shut_down() {
        match listener.accept() {
            Ok((stream, addr)) => {
                crate::debug!("bridge"; "client connected: {}", addr);
                // Set blocking for the WebSocket handshake
                let _ = stream.set_nonblocking(false);

                let bus = bus.clone();
                let spawned = thread::Builder::new()
                    .name(format!("bridge-{addr}"))
                    .spawn(move || client_io::serve(bus, stream));
                if let Err(e) = spawned {
                    crate::log!("bridge"; "cannot serve {}: {}", addr, e);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_INTERVAL);
            }
            Err(e) => {
                crate::log!("bridge"; "accept error: {}", e);
                thread::sleep(ACCEPT_INTERVAL);
            }
        }
    }
    crate::debug!("bridge"; "acceptor stopped");
}

/// Try binding to port, retry with incremented port if in use
fn try_bind_port(interface: IpAddr, base_port: u16, max_retries: u16) -> Result<(TcpListener, SocketAddr)> {
    let mut last_error = None;

    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        match TcpListener::bind(SocketAddr::new(interface, port)) {
            Ok(listener) => {
                let addr = listener.local_addr()?;
                return Ok((listener, addr));
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(anyhow::anyhow!(
        "Failed to bind bridge after {} attempts (ports {}-{}): {}",
        max_retries,
        base_port,
        base_port.saturating_add(max_retries - 1),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}
