//! `[bus]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [bus]
//! interface = "127.0.0.1"     # WebSocket bridge interface
//! port = 35729                # First port to try
//! bridge = true               # Let external processes attach
//! ```

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// Orchestration bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Network interface the WebSocket bridge binds.
    pub interface: IpAddr,

    /// Bridge port; successive ports are tried when it is taken.
    pub port: u16,

    /// Start the WebSocket bridge at all.
    pub bridge: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interface: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 35729,
            bridge: true,
        }
    }
}
