use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::debouncer::{Debouncer, correct_by_existence};
use super::*;
use crate::bus::{CloseReason, Message, Polled};
use crate::core::Topology;
use crate::engine::{EngineSettings, RecompositionLog, RedefinitionEngine, SimulatedRuntime};

// ============================================================================
// debouncer
// ============================================================================

#[test]
fn test_burst_collapses_to_one_entry() {
    let mut debouncer = Debouncer::new(Duration::ZERO);
    let path = PathBuf::from("/out/Foo.class");
    debouncer.add(path.clone(), ChangeKind::Modified);
    debouncer.add(path.clone(), ChangeKind::Modified);
    debouncer.add(path.clone(), ChangeKind::Modified);

    let changes = debouncer.take_if_ready().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[&path], ChangeKind::Modified);
    assert!(debouncer.take_if_ready().is_none());
}

#[test]
fn test_events_fold_within_window() {
    let mut debouncer = Debouncer::new(Duration::from_secs(60));
    let restored = PathBuf::from("/out/Restored.class");
    let vanished = PathBuf::from("/out/Vanished.class");
    let deleted = PathBuf::from("/out/Deleted.class");

    debouncer.add(restored.clone(), ChangeKind::Removed);
    debouncer.add(restored.clone(), ChangeKind::Created);
    debouncer.add(vanished.clone(), ChangeKind::Created);
    debouncer.add(vanished.clone(), ChangeKind::Removed);
    debouncer.add(deleted.clone(), ChangeKind::Modified);
    debouncer.add(deleted.clone(), ChangeKind::Removed);

    // Quiet period not over yet
    assert!(debouncer.take_if_ready().is_none());

    let changes = debouncer.take_now().unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[&restored], ChangeKind::Modified);
    assert_eq!(changes[&deleted], ChangeKind::Removed);
}

#[test]
fn test_sleep_duration_tracks_quiet_period() {
    let mut debouncer = Debouncer::new(Duration::from_millis(300));
    assert!(debouncer.sleep_duration() > Duration::from_secs(3600));

    debouncer.add(PathBuf::from("/out/A.class"), ChangeKind::Created);
    let sleep = debouncer.sleep_duration();
    assert!(sleep <= Duration::from_millis(300));
    assert!(sleep >= Duration::from_millis(1));
}

#[test]
fn test_vanished_file_leaves_debouncer_idle() {
    let mut debouncer = Debouncer::new(Duration::from_millis(20));
    let path = PathBuf::from("/out/Temp.class");
    debouncer.add(path.clone(), ChangeKind::Created);
    debouncer.add(path, ChangeKind::Removed);

    std::thread::sleep(Duration::from_millis(40));
    assert!(debouncer.sleep_duration() > Duration::from_secs(1));
    assert!(debouncer.take_if_ready().is_none());
    assert!(debouncer.sleep_duration() > Duration::from_secs(1));
}

#[test]
fn test_kinds_are_reconciled_with_disk() {
    let dir = TempDir::new().unwrap();
    let present = dir.path().join("Present.class");
    fs::write(&present, "x").unwrap();
    let absent = dir.path().join("Absent.class");

    let mut changes = FxHashMap::default();
    changes.insert(present.clone(), ChangeKind::Removed);
    changes.insert(absent.clone(), ChangeKind::Modified);
    correct_by_existence(&mut changes);

    assert_eq!(changes[&present], ChangeKind::Modified);
    assert_eq!(changes[&absent], ChangeKind::Removed);
}

// ============================================================================
// coordinator
// ============================================================================

struct Fixture {
    _dir: TempDir,
    bus: Bus,
    wiring: ArtifactWiring,
    classes: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let classes = Topology::SingleRuntime.classes_dir(dir.path());
        fs::create_dir_all(&classes).unwrap();
        let classes = crate::utils::path::normalize_path(&classes);
        let wiring = ArtifactWiring::for_project(dir.path(), Topology::SingleRuntime);
        Self {
            _dir: dir,
            bus: Bus::new(),
            wiring,
            classes,
        }
    }

    fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.classes.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }
}

fn fast() -> CoordinatorSettings {
    CoordinatorSettings {
        quiet: Duration::from_millis(50),
        outcome_timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            attempts: 2,
            base: Duration::from_millis(5),
            max: Duration::from_millis(10),
        },
    }
}

fn changed(path: &Path) -> WatchEvent {
    WatchEvent::Changed {
        path: path.to_path_buf(),
        kind: ChangeKind::Modified,
    }
}

async fn next(stream: &mut Subscription) -> Message {
    tokio::time::timeout(Duration::from_secs(3), stream.recv())
        .await
        .expect("timed out waiting for message")
        .expect("stream ended")
}

fn is_batch(m: &Message) -> bool {
    matches!(m.payload, Payload::ClassUpdateBatch { .. })
}

#[tokio::test]
async fn test_change_to_foo_reloads_as_generation_one() {
    let fx = Fixture::new();
    let foo = fx.write("com/example/Foo.class", "v0");

    let runtime = SimulatedRuntime::new();
    runtime.load("com.example.Foo".into(), b"v0").unwrap();
    let log = RecompositionLog::new();
    let engine = RedefinitionEngine::attach(
        &fx.bus,
        runtime.clone(),
        Arc::new(log.clone()),
        EngineSettings::default(),
    )
    .unwrap();
    let app = engine.session();
    let mut from_app = fx.bus.subscribe(move |m| m.is_from(app));
    let mut batches = fx.bus.subscribe(is_batch);
    tokio::spawn(engine.run());

    let coordinator = ReloadCoordinator::attach(&fx.bus, app, fx.wiring.clone(), fast()).unwrap();
    assert_eq!(coordinator.ledger().len(), 1);
    let history = coordinator.history();
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(coordinator.run(rx));

    // Three saves inside one quiet window
    for body in ["v1", "v2", "v3"] {
        fs::write(&foo, body).unwrap();
        tx.send(changed(&foo)).await.unwrap();
    }

    let Payload::ClassUpdateBatch { generation_id, entries } = next(&mut batches).await.payload else {
        panic!("expected a batch");
    };
    assert_eq!(generation_id, GenerationId::FIRST);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].unit_name.as_str(), "com.example.Foo");
    assert_eq!(entries[0].content, b"v3");
    assert_eq!(entries[0].change, UnitChange::Modified);

    assert_eq!(
        next(&mut from_app).await.payload,
        Payload::ReloadOutcomeBatch {
            generation_id: GenerationId::FIRST,
            entries: vec![OutcomeEntry::new("com.example.Foo".into(), Outcome::Applied)],
        }
    );
    assert_eq!(
        next(&mut from_app).await.payload,
        Payload::RecompositionRequested {
            generation_id: GenerationId::FIRST
        }
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(matches!(from_app.poll_next(), Polled::Empty));
    assert!(matches!(batches.poll_next(), Polled::Empty));
    assert_eq!(log.len(), 1);
    assert_eq!(runtime.body(&"com.example.Foo".into()).unwrap(), b"v3");

    let record = history.last().unwrap();
    assert_eq!(record.status, GenerationStatus::Applied);
    assert_eq!(record.outcomes.len(), 1);
}

#[tokio::test]
async fn test_unchanged_units_are_never_sent() {
    let fx = Fixture::new();
    let foo = fx.write("Foo.class", "v0");
    let app = fx.bus.connect(Role::Application).unwrap();
    let mut batches = fx.bus.subscribe(is_batch);

    let coordinator = ReloadCoordinator::attach(&fx.bus, app, fx.wiring.clone(), fast()).unwrap();
    let history = coordinator.history();
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(coordinator.run(rx));

    // Touched, but the bytes match the baseline
    tx.send(changed(&foo)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(matches!(batches.poll_next(), Polled::Empty));
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_unknown_units_are_flagged_new() {
    let fx = Fixture::new();
    let app = fx.bus.connect(Role::Application).unwrap();
    let mut batches = fx.bus.subscribe(is_batch);

    let coordinator = ReloadCoordinator::attach(&fx.bus, app, fx.wiring.clone(), fast()).unwrap();
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(coordinator.run(rx));

    let bar = fx.write("Bar.class", "bar");
    tx.send(WatchEvent::Changed {
        path: bar,
        kind: ChangeKind::Created,
    })
    .await
    .unwrap();

    let Payload::ClassUpdateBatch { entries, .. } = next(&mut batches).await.payload else {
        panic!("expected a batch");
    };
    assert_eq!(entries[0].change, UnitChange::New);
}

#[tokio::test]
async fn test_build_complete_flushes_before_quiet_period() {
    let fx = Fixture::new();
    let app = fx.bus.connect(Role::Application).unwrap();
    let builder = fx.bus.connect(Role::Compiler).unwrap();
    let mut batches = fx.bus.subscribe(is_batch);

    let settings = CoordinatorSettings {
        quiet: Duration::from_secs(60),
        ..fast()
    };
    let coordinator = ReloadCoordinator::attach(&fx.bus, app, fx.wiring.clone(), settings).unwrap();
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(coordinator.run(rx));

    let foo = fx.write("Foo.class", "v1");
    tx.send(changed(&foo)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    fx.bus.send(builder, Payload::BuildComplete).unwrap();

    let message = next(&mut batches).await;
    assert!(message.is_for(app));
}

#[tokio::test]
async fn test_silent_application_times_out() {
    let fx = Fixture::new();
    let app = fx.bus.connect(Role::Application).unwrap();
    let mut timeouts = fx
        .bus
        .subscribe(|m| matches!(m.payload, Payload::GenerationTimedOut { .. }));
    let mut batches = fx.bus.subscribe(is_batch);

    let settings = CoordinatorSettings {
        outcome_timeout: Duration::from_millis(100),
        ..fast()
    };
    let coordinator = ReloadCoordinator::attach(&fx.bus, app, fx.wiring.clone(), settings).unwrap();
    let history = coordinator.history();
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(coordinator.run(rx));

    let foo = fx.write("Foo.class", "v1");
    tx.send(changed(&foo)).await.unwrap();

    assert_eq!(
        next(&mut timeouts).await.payload,
        Payload::GenerationTimedOut {
            generation_id: GenerationId::FIRST
        }
    );
    next(&mut batches).await;

    // A late answer does not revive the generation
    fx.bus
        .send(
            app,
            Payload::ReloadOutcomeBatch {
                generation_id: GenerationId::FIRST,
                entries: vec![OutcomeEntry::new("Foo".into(), Outcome::Applied)],
            },
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        history.get(GenerationId::FIRST).unwrap().status,
        GenerationStatus::TimedOut
    );

    // Nothing was recorded, so the same bytes go out again
    tx.send(changed(&foo)).await.unwrap();
    let Payload::ClassUpdateBatch { generation_id, .. } = next(&mut batches).await.payload else {
        panic!("expected a batch");
    };
    assert_eq!(generation_id, GenerationId::new(2));
}

#[tokio::test]
async fn test_closing_target_cancels_in_flight_batch() {
    let fx = Fixture::new();
    let app = fx.bus.connect(Role::Application).unwrap();
    let mut batches = fx.bus.subscribe(is_batch);

    let coordinator = ReloadCoordinator::attach(&fx.bus, app, fx.wiring.clone(), fast()).unwrap();
    let compiler = coordinator.session();
    let history = coordinator.history();
    let mut outcomes = fx.bus.subscribe(move |m| {
        m.is_from(compiler) && matches!(m.payload, Payload::ReloadOutcomeBatch { .. })
    });
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(coordinator.run(rx));

    for name in ["A.class", "B.class"] {
        let path = fx.write(name, "v1");
        tx.send(changed(&path)).await.unwrap();
    }
    next(&mut batches).await;

    fx.bus
        .disconnect(
            app,
            CloseReason::Transport {
                detail: "process exited".into(),
            },
        )
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("coordinator should stop")
        .unwrap();
    assert!(matches!(result, Err(CoordinatorError::Disconnected(s)) if s == app));

    let Payload::ReloadOutcomeBatch { entries, .. } = next(&mut outcomes).await.payload else {
        panic!("expected cancelled outcomes");
    };
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert_eq!(entry.outcome, Outcome::failed(FailureCause::Cancelled));
    }

    let record = history.get(GenerationId::FIRST).unwrap();
    assert_eq!(record.status, GenerationStatus::Failed);
}

#[tokio::test]
async fn test_lost_root_fails_the_watch() {
    let fx = Fixture::new();
    let app = fx.bus.connect(Role::Application).unwrap();
    let mut failures = fx
        .bus
        .subscribe(|m| matches!(m.payload, Payload::WatchFailed { .. }));

    let coordinator = ReloadCoordinator::attach(&fx.bus, app, fx.wiring.clone(), fast()).unwrap();
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(coordinator.run(rx));

    tx.send(WatchEvent::RootTimedOut {
        root: fx.classes.clone(),
        missing_for: Duration::from_secs(31),
    })
    .await
    .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(CoordinatorError::WatchTimeout { .. })));

    let Payload::WatchFailed { path, .. } = next(&mut failures).await.payload else {
        panic!("expected watch failure");
    };
    assert_eq!(path, fx.classes);
}

fn watch_error(path: &Path) -> WatchEvent {
    WatchEvent::Failed {
        path: path.to_path_buf(),
        kind: io::ErrorKind::PermissionDenied,
        detail: "permission denied".into(),
    }
}

#[tokio::test]
async fn test_repeated_watch_errors_fail_the_watch() {
    let fx = Fixture::new();
    let app = fx.bus.connect(Role::Application).unwrap();
    let mut failures = fx
        .bus
        .subscribe(|m| matches!(m.payload, Payload::WatchFailed { .. }));

    let coordinator = ReloadCoordinator::attach(&fx.bus, app, fx.wiring.clone(), fast()).unwrap();
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(coordinator.run(rx));

    // A change below the root in between restarts the count
    tx.send(watch_error(&fx.classes)).await.unwrap();
    tx.send(changed(&fx.classes.join("Gone.class"))).await.unwrap();
    tx.send(watch_error(&fx.classes)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!task.is_finished());

    tx.send(watch_error(&fx.classes)).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    let Err(CoordinatorError::IoFailure { path, attempts, source }) = result else {
        panic!("expected an I/O failure");
    };
    assert_eq!(path, fx.classes);
    assert_eq!(attempts, 2);
    assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);

    let Payload::WatchFailed { path, reason } = next(&mut failures).await.payload else {
        panic!("expected watch failure");
    };
    assert_eq!(path, fx.classes);
    assert_eq!(reason, "permission denied");
}

#[tokio::test]
async fn test_stops_when_watcher_goes_away() {
    let fx = Fixture::new();
    let app = fx.bus.connect(Role::Application).unwrap();
    let coordinator = ReloadCoordinator::attach(&fx.bus, app, fx.wiring.clone(), fast()).unwrap();
    let compiler = coordinator.session();
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(coordinator.run(rx));

    drop(tx);
    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(
        fx.bus.state(compiler),
        Some(crate::bus::SessionState::Closed)
    );
}
