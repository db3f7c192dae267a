//! Actor System for Hot Reload
//!
//! Message-passing concurrency for watch mode:
//!
//! ```text
//! FsActor --> ReloadCoordinator --> Bus --> RedefinitionEngine
//! (watch)     (debounce, hash)      │       (apply, report)
//!                                   └──> Bridge --> external processes
//! ```
//!
//! # Module Structure
//!
//! - `fs` - Artifact directory watcher
//! - `reload` - Debouncing, diffing and generation tracking
//! - `bridge` - WebSocket bridge for out-of-process sessions
//! - `coordinator` - Wires up and runs actors

pub mod bridge;
pub mod coordinator;
pub mod fs;
pub mod reload;

pub use coordinator::Coordinator;
