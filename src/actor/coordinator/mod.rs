//! Actor Coordinator - Wires up the Hot Reload Actor System
//!
//! The Coordinator is a thin orchestrator that:
//! - Creates the bus and (optionally) the WebSocket bridge
//! - Starts an observer that prints session events
//! - Optionally hosts an embedded application (simulated runtime)
//! - Starts one watch + reload pipeline per connected application
//!
//! ```text
//! Application hello ──> FsActor ──WatchEvent──> ReloadCoordinator ──> Bus
//! ```

mod runtime;
mod status;

use std::sync::Arc;

use anyhow::Result;
use crossbeam::channel::Receiver;

use super::bridge::Bridge;
use crate::bus::{Bus, Payload};
use crate::config::ReloadConfig;
use crate::core::Role;

/// Coordinator - wires up and runs the actor system.
pub struct Coordinator {
    config: Arc<ReloadConfig>,
    bus: Bus,
    embedded: bool,
    shutdown_rx: Option<Receiver<()>>,
}

impl Coordinator {
    /// Create from Arc<ReloadConfig>.
    pub fn with_config(config: Arc<ReloadConfig>) -> Self {
        Self {
            config,
            bus: Bus::new(),
            embedded: false,
            shutdown_rx: None,
        }
    }

    /// Host an application with a simulated runtime in this process.
    pub fn embedded(mut self, embedded: bool) -> Self {
        self.embedded = embedded;
        self
    }

    /// Set shutdown signal receiver.
    pub fn with_shutdown_signal(mut self, rx: Receiver<()>) -> Self {
        self.shutdown_rx = Some(rx);
        self
    }

    /// Handle to the bus this coordinator runs.
    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    /// Run the actor system until the shutdown signal (or bus shutdown).
    pub async fn run(mut self) -> Result<()> {
        let bridge = if self.config.bus.bridge {
            match Bridge::start(&self.bus, self.config.bus.interface, self.config.bus.port) {
                Ok(bridge) => {
                    crate::log!("bridge"; "listening on ws://{}", bridge.addr());
                    Some(bridge)
                }
                Err(e) => {
                    crate::log!("bridge"; "websocket bridge failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let status = status::spawn(&self.bus)?;

        // Subscribed before any application can connect
        let hellos = self.bus.subscribe(|m| {
            matches!(
                m.payload,
                Payload::Hello {
                    role: Role::Application
                }
            )
        });

        if self.embedded {
            runtime::spawn_embedded(&self.bus, &self.config)?;
        }

        crate::debug!("actor"; "start");
        let shutdown_rx = self.shutdown_rx.take();
        runtime::run_pipelines(&self.bus, self.config.clone(), hellos, shutdown_rx).await;

        let _ = tokio::time::timeout(std::time::Duration::from_millis(500), status).await;
        if let Some(bridge) = bridge {
            let _ = tokio::task::spawn_blocking(move || bridge.join()).await;
        }

        crate::debug!("actor"; "stopped");
        Ok(())
    }
}
