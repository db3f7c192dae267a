//! `watch` command: bus, bridge, watcher and reload pipelines until Ctrl+C.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::actor::Coordinator;
use crate::config::ReloadConfig;
use crate::core::register_shutdown;
use crate::log;

pub fn watch(config: Arc<ReloadConfig>, embedded: bool) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    // Ctrl+C now drains the actors instead of exiting
    let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded(1);
    register_shutdown(shutdown_tx);

    log!("watch"; "{} topology, {} roots{}",
        config.watch.topology,
        config.watch_roots().len(),
        if embedded { ", embedded application" } else { "" });

    rt.block_on(
        Coordinator::with_config(config)
            .embedded(embedded)
            .with_shutdown_signal(shutdown_rx)
            .run(),
    )
}
