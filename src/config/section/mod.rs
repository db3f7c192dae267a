//! Configuration sections of `hotreload.toml`.

mod bus;
mod engine;
mod watch;

pub use bus::BusConfig;
pub use engine::EngineConfig;
pub use watch::WatchConfig;
