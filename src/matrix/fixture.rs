//! Per-invocation fixture: an isolated project, bus and application.
//!
//! ```text
//! TempDir project (topology layout)
//!     │ scan
//!     ▼
//! SimulatedRuntime ── RedefinitionEngine (Application session)
//!                          ▲ ClassUpdateBatch
//! FsActor ─WatchEvent─> ReloadCoordinator (Compiler session)
//!
//! Observer session for the test body
//! ```
//!
//! Nothing is shared between fixtures; each owns its bus.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::context::{InvocationContext, ScenarioKind};
use super::error::TestFixtureError;
use super::visual::SimulatedScreen;
use crate::actor::fs::{ChangeKind, FsActor, WatchEvent};
use crate::actor::reload::{
    ArtifactWiring, CoordinatorSettings, GenerationRecord, History, ReloadCoordinator,
};
use crate::bus::{Bus, CloseReason, Payload, Subscription};
use crate::core::{GenerationId, Role, SessionId, Topology, UnitName};
use crate::engine::{EngineSettings, RecompositionLog, RedefinitionEngine, SimulatedRuntime};
use crate::utils::retry::RetryPolicy;

const EVENT_BUFFER: usize = 64;
const ROOT_TIMEOUT: Duration = Duration::from_secs(30);
const POLL: Duration = Duration::from_millis(10);

/// Units every fixture project starts with, relative to the classes dir.
const SEED_UNITS: &[(&str, &str)] = &[
    (
        "app/MainKt.class",
        "super java.lang.Object\n---\nfun main() = App()\n",
    ),
    (
        "app/Counter.class",
        "super androidx.compose.runtime.RememberObserver\nfield count: Int\n---\nText(\"count: $count\")\n",
    ),
    (
        "app/Greeting.class",
        "super java.lang.Object\nfield name: String\n---\nText(\"Hello, $name\")\n",
    ),
];

const SEED_RESOURCES: &[(&str, &str)] = &[("values/strings.xml", "<resources/>\n")];

/// Timing for fixture pipelines; tighter than the interactive defaults.
#[derive(Debug, Clone, Copy)]
pub struct FixtureSettings {
    pub quiet: Duration,
    pub outcome_timeout: Duration,
    pub restart_threshold: u32,
}

impl Default for FixtureSettings {
    fn default() -> Self {
        Self {
            quiet: Duration::from_millis(50),
            outcome_timeout: Duration::from_secs(5),
            restart_threshold: 3,
        }
    }
}

pub struct Fixture {
    context: InvocationContext,
    project: TempDir,
    wiring: ArtifactWiring,
    /// Where `write_unit` puts compiled units
    classes: PathBuf,
    bus: Bus,
    application: SessionId,
    compiler: SessionId,
    observer: SessionId,
    runtime: SimulatedRuntime,
    ui: RecompositionLog,
    history: History,
    screen: Option<SimulatedScreen>,
    /// Lets writes reach the coordinator without waiting on the OS watcher
    events_tx: mpsc::Sender<WatchEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Fixture {
    /// Lay out a project for the context's topology and start its
    /// application, watcher and coordinator. Must run inside a tokio runtime.
    pub fn launch(
        context: &InvocationContext,
        settings: FixtureSettings,
    ) -> Result<Self, TestFixtureError> {
        let project = TempDir::new().map_err(launch_failed("project dir"))?;
        let wiring = ArtifactWiring::for_project(project.path(), context.topology);
        let classes = wiring
            .classes_dirs()
            .first()
            .cloned()
            .ok_or_else(|| TestFixtureError::LaunchFailed("no classes directory".into()))?;
        lay_out(&classes, wiring.resources_dir()).map_err(launch_failed("project layout"))?;

        let scan = wiring.scan();
        if let Some((path, e)) = scan.errors.first() {
            return Err(TestFixtureError::LaunchFailed(format!("scan {}: {e}", path.display())));
        }
        let runtime = SimulatedRuntime::new();
        for (path, unit) in scan.units {
            let content = fs::read(&path).map_err(launch_failed("seed unit"))?;
            runtime
                .load(unit, &content)
                .map_err(|e| TestFixtureError::LaunchFailed(e.to_string()))?;
        }

        let bus = Bus::new();
        let ui = RecompositionLog::new();
        let engine = RedefinitionEngine::attach(
            &bus,
            runtime.clone(),
            Arc::new(ui.clone()),
            EngineSettings {
                restart_threshold: settings.restart_threshold,
            },
        )
        .map_err(|e| TestFixtureError::LaunchFailed(e.to_string()))?;
        let application = engine.session();

        let observer = bus
            .connect(Role::Observer)
            .map_err(|e| TestFixtureError::SetupFailed(e.to_string()))?;

        // Watcher before the coordinator's baseline scan
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let watcher = FsActor::new(wiring.roots(), ROOT_TIMEOUT, events_tx.clone())
            .map_err(|e| TestFixtureError::SetupFailed(format!("watcher: {e}")))?;
        let coordinator = ReloadCoordinator::attach(
            &bus,
            application,
            wiring.clone(),
            CoordinatorSettings {
                quiet: settings.quiet,
                outcome_timeout: settings.outcome_timeout,
                retry: RetryPolicy::default(),
            },
        )
        .map_err(|e| TestFixtureError::SetupFailed(e.to_string()))?;
        let compiler = coordinator.session();
        let history = coordinator.history();

        let tasks = vec![
            tokio::spawn(engine.run()),
            tokio::spawn(watcher.run()),
            tokio::spawn(async move {
                if let Err(e) = coordinator.run(events_rx).await {
                    crate::debug!("matrix"; "coordinator stopped: {}", e);
                }
            }),
        ];

        let screen = (context.kind() == ScenarioKind::Screenshot)
            .then(|| SimulatedScreen::new(runtime.clone()));

        crate::debug!("matrix"; "{} launched app {} in {}", context, application, project.path().display());

        Ok(Self {
            context: context.clone(),
            project,
            wiring,
            classes,
            bus,
            application,
            compiler,
            observer,
            runtime,
            ui,
            history,
            screen,
            events_tx,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    #[inline]
    pub fn topology(&self) -> Topology {
        self.context.topology
    }

    pub fn project_root(&self) -> &Path {
        self.project.path()
    }

    pub fn wiring(&self) -> &ArtifactWiring {
        &self.wiring
    }

    pub fn classes_dir(&self) -> &Path {
        &self.classes
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    #[inline]
    pub fn application(&self) -> SessionId {
        self.application
    }

    #[inline]
    pub fn compiler(&self) -> SessionId {
        self.compiler
    }

    /// The test body's own session.
    #[inline]
    pub fn observer(&self) -> SessionId {
        self.observer
    }

    pub fn runtime(&self) -> &SimulatedRuntime {
        &self.runtime
    }

    pub fn recompositions(&self) -> &RecompositionLog {
        &self.ui
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Only screenshot scenarios have a screen.
    pub fn screen(&self) -> Option<&SimulatedScreen> {
        self.screen.as_ref()
    }

    /// Everything the application says, in send order.
    pub fn subscribe_application(&self) -> Subscription {
        let application = self.application;
        self.bus.subscribe(move |m| {
            m.is_from(application)
                && matches!(
                    m.payload,
                    Payload::ReloadOutcomeBatch { .. }
                        | Payload::RecompositionRequested { .. }
                        | Payload::RestartRequired { .. }
                )
        })
    }

    /// Write a compiled unit under the first classes directory, as a build
    /// would, and return its unit name.
    pub fn write_unit(&self, relative: &str, content: &[u8]) -> io::Result<UnitName> {
        let path = self.classes.join(relative);
        let unit = self.wiring.unit_for(&path).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("{relative} is not a unit"))
        })?;

        let kind = if path.exists() {
            ChangeKind::Modified
        } else {
            ChangeKind::Created
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;

        // The OS watcher reports this too; the debouncer folds both
        let _ = self.events_tx.try_send(WatchEvent::Changed { path, kind });
        Ok(unit)
    }

    /// Wait until generation `id` reaches a terminal status.
    pub async fn generation(&self, id: GenerationId, timeout: Duration) -> Option<GenerationRecord> {
        let wait = async {
            loop {
                if let Some(record) = self.history.get(id)
                    && record.status.is_terminal()
                {
                    return record;
                }
                tokio::time::sleep(POLL).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    /// Write one unit and wait for the generation that carries it.
    pub async fn reload(
        &self,
        relative: &str,
        content: &[u8],
    ) -> Result<GenerationRecord, TestFixtureError> {
        let next = self
            .history
            .last()
            .map_or(GenerationId::FIRST, |record| record.id.next());
        self.write_unit(relative, content)
            .map_err(|e| TestFixtureError::SetupFailed(e.to_string()))?;
        self.generation(next, Duration::from_secs(10))
            .await
            .ok_or_else(|| TestFixtureError::SetupFailed(format!("generation {next} never settled")))
    }

    /// Close the sessions, stop the bus and wait up to `grace` for the
    /// fixture's tasks. Returns how many had to be aborted.
    pub async fn teardown(&self, grace: Duration) -> usize {
        for session in [self.observer, self.application] {
            let _ = self.bus.disconnect(session, CloseReason::Teardown);
        }
        self.bus.shutdown();

        let handles = std::mem::take(&mut *self.tasks.lock());
        let deadline = tokio::time::Instant::now() + grace;
        let mut forced = 0;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                forced += 1;
            }
        }
        if forced > 0 {
            crate::debug!("matrix"; "{}: aborted {} tasks after {:?}", self.context, forced, grace);
        }
        forced
    }
}

fn lay_out(classes: &Path, resources: Option<&Path>) -> io::Result<()> {
    for (relative, content) in SEED_UNITS {
        let path = classes.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
    }

    if let Some(resources) = resources {
        for (relative, content) in SEED_RESOURCES {
            let path = resources.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;
        }
    }
    Ok(())
}

fn launch_failed(what: &'static str) -> impl Fn(io::Error) -> TestFixtureError {
    move |e| TestFixtureError::LaunchFailed(format!("{what}: {e}"))
}
