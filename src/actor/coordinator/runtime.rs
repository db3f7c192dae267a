use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossbeam::channel::Receiver;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use crate::actor::fs::FsActor;
use crate::actor::reload::{ArtifactWiring, CoordinatorError, CoordinatorSettings, ReloadCoordinator};
use crate::bus::{Bus, Subscription};
use crate::config::ReloadConfig;
use crate::core::SessionId;
use crate::engine::{EngineSettings, RecompositionScope, RedefinitionEngine, SimulatedRuntime, UiRuntime};

const EVENT_BUFFER: usize = 64;
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

type PipelineResult = (SessionId, Result<(), CoordinatorError>);

/// The embedded application has no UI; recomposition is only logged.
struct LoggingUi;

impl UiRuntime for LoggingUi {
    fn request_recomposition(&self, scope: &RecompositionScope) {
        crate::debug!("ui"; "recompose {} units for {}", scope.units.len(), scope.generation);
    }
}

/// Start an in-process application whose runtime is seeded with the
/// current artifacts.
pub(super) fn spawn_embedded(bus: &Bus, config: &ReloadConfig) -> Result<SessionId> {
    let wiring = ArtifactWiring::from_config(config);
    let runtime = SimulatedRuntime::new();

    let scan = wiring.scan();
    for (path, e) in &scan.errors {
        crate::log!("embedded"; "cannot scan {}: {}", path.display(), e);
    }

    let mut loaded = 0usize;
    for (path, unit) in scan.units {
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) => {
                crate::debug!("embedded"; "skip {}: {}", path.display(), e);
                continue;
            }
        };
        match runtime.load(unit, &content) {
            Ok(()) => loaded += 1,
            Err(e) => crate::log!("embedded"; "{}", e),
        }
    }

    let engine = RedefinitionEngine::attach(
        bus,
        runtime,
        Arc::new(LoggingUi),
        EngineSettings::from_config(config),
    )?;
    let session = engine.session();
    crate::log!("embedded"; "application {} loaded {} units", session, loaded);
    tokio::spawn(engine.run());
    Ok(session)
}

/// Start a pipeline for every application that says hello, until shutdown.
pub(super) async fn run_pipelines(
    bus: &Bus,
    config: Arc<ReloadConfig>,
    mut hellos: Subscription,
    shutdown_rx: Option<Receiver<()>>,
) {
    let mut pipelines = JoinSet::new();
    let mut tick = tokio::time::interval(SHUTDOWN_POLL);

    loop {
        tokio::select! {
            biased;

            _ = tick.tick(), if shutdown_rx.is_some() => {
                if shutdown_rx.as_ref().is_some_and(|rx| rx.try_recv().is_ok()) {
                    crate::debug!("actor"; "shutdown signal received");
                    break;
                }
            }

            hello = hellos.recv() => {
                let Some(hello) = hello else { break };
                match start_pipeline(bus, &config, hello.session) {
                    Ok(pipeline) => {
                        pipelines.spawn(pipeline);
                    }
                    Err(e) => crate::log!("watch"; "cannot watch for {}: {}", hello.session, e),
                }
            }

            Some(done) = pipelines.join_next() => report(done),
        }
    }

    bus.shutdown();
    let _ = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Some(done) = pipelines.join_next().await {
            report(done);
        }
    })
    .await;
}

fn start_pipeline(
    bus: &Bus,
    config: &ReloadConfig,
    target: SessionId,
) -> Result<impl Future<Output = PipelineResult> + Send + 'static> {
    let wiring = ArtifactWiring::from_config(config);
    let roots = wiring.roots();
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

    // Watcher first: changes made while the baseline is hashed are buffered
    let fs = FsActor::new(roots.clone(), config.watch.root_timeout(), events_tx)
        .map_err(|e| anyhow::anyhow!("watcher failed: {}", e))?
        .with_retry(config.watch.retry_policy());
    let coordinator =
        ReloadCoordinator::attach(bus, target, wiring, CoordinatorSettings::from_config(config))?;

    crate::log!("watch"; "{} roots for application {}", roots.len(), target);
    for root in &roots {
        crate::debug!("watch"; "  {}", root.display());
    }

    tokio::spawn(fs.run());
    Ok(async move { (target, coordinator.run(events_rx).await) })
}

fn report(done: Result<PipelineResult, JoinError>) {
    match done {
        Ok((target, Ok(()))) => crate::debug!("watch"; "pipeline for {} finished", target),
        Ok((target, Err(CoordinatorError::Disconnected(_)))) => {
            crate::log!("watch"; "application {} left", target);
        }
        Ok((target, Err(e))) => crate::log!("error"; "watch for {} failed: {}", target, e),
        Err(e) => crate::log!("error"; "pipeline panicked: {}", e),
    }
}
