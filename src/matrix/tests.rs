use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail, ensure};
use parking_lot::Mutex;

use super::*;
use crate::bus::{Payload, SessionState};
use crate::core::{GenerationId, GenerationStatus, Topology, UnitName};
use crate::engine::RecompositionScope;

const GREETING: &str = "app/Greeting.class";
const GREETING_V2: &[u8] = b"super java.lang.Object\nfield name: String\n---\nText(\"Hi there, $name\")\n";

async fn recomposition_for(fixture: &Fixture, app: &mut crate::bus::Subscription) -> anyhow::Result<GenerationId> {
    let deadline = Duration::from_secs(5);
    loop {
        let message = tokio::time::timeout(deadline, app.recv())
            .await
            .context("no recomposition")?
            .context("bus closed")?;
        if let Payload::RecompositionRequested { generation_id } = message.payload {
            ensure!(message.is_from(fixture.application()));
            return Ok(generation_id);
        }
    }
}

async fn edit_greeting(mut invocation: Invocation) -> anyhow::Result<()> {
    let fixture = invocation.take_fixture().context("fixture missing")?;
    ensure!(fixture.topology() == invocation.context().topology);

    let mut app = fixture.subscribe_application();
    let record = fixture.reload(GREETING, GREETING_V2).await?;

    ensure!(record.id == GenerationId::FIRST, "got {}", record.id);
    ensure!(record.status == GenerationStatus::Applied, "got {:?}", record.status);
    ensure!(record.units == [UnitName::new("app.Greeting")]);
    ensure!(recomposition_for(&fixture, &mut app).await? == GenerationId::FIRST);
    ensure!(fixture.recompositions().len() == 1);

    let body = fixture.runtime().body(&"app.Greeting".into()).context("unloaded")?;
    ensure!(String::from_utf8_lossy(&body).contains("Hi there"));
    Ok(())
}

async fn compare_screens(mut invocation: Invocation) -> anyhow::Result<()> {
    let fixture = invocation.take_fixture().context("fixture missing")?;
    if invocation.context().kind() == ScenarioKind::HotReload {
        ensure!(fixture.screen().is_none());
        return Ok(());
    }

    let screen = fixture.screen().context("screenshot scenario without screen")?;
    let scope = RecompositionScope {
        generation: GenerationId::FIRST,
        units: vec!["app.Greeting".into(), "app.MainKt".into()],
    };
    let before = screen.render(&scope);
    fixture.reload(GREETING, GREETING_V2).await?;
    let after = screen.render(&scope);

    let diff = screen.compare(&before, &after);
    ensure!(!diff.is_identical());
    // One of two bands changed
    ensure!(diff.within(0.5) && !diff.within(0.49), "{:?}", diff);
    Ok(())
}

async fn by_name(invocation: Invocation) -> anyhow::Result<()> {
    match invocation.context().parent.display_name.as_str() {
        "boom" => panic!("exploded"),
        "wrong" => bail!("expected 2 units, got 1"),
        _ => Ok(()),
    }
}

async fn await_ready(mut invocation: Invocation) -> anyhow::Result<()> {
    let first = invocation.take_ready().context("ready missing")?;
    let second = invocation.take_ready().context("second ready missing")?;
    ensure!(invocation.take_fixture().is_none());

    let fixture = first.await?;
    ensure!(fixture.topology() == invocation.context().topology);
    ensure!(fixture.runtime().body(&"app.MainKt".into()).is_some());
    ensure!(fixture.project_root().exists());

    // Only one consumer per setup
    ensure!(second.await.err() == Some(TestFixtureError::Cancelled));
    Ok(())
}

async fn keep_and_fail(
    mut invocation: Invocation,
    seen: Arc<Mutex<Vec<Arc<Fixture>>>>,
) -> anyhow::Result<()> {
    let fixture = invocation.take_fixture().context("fixture missing")?;
    seen.lock().push(fixture);
    // Teardown runs even though the body fails
    bail!("deliberate")
}

// ============================================================================
// expansion
// ============================================================================

#[test]
fn test_one_parent_expands_to_both_topologies() {
    let contexts = MatrixRunner::new().expand(&[ParentContext::hot_reload("reload smoke")]);
    let names: Vec<_> = contexts.iter().map(InvocationContext::display_name).collect();
    assert_eq!(
        names,
        ["reload smoke [SingleRuntime]", "reload smoke [MultiPlatformRuntime]"]
    );
}

#[test]
fn test_report_counts_and_display() {
    let report = MatrixReport {
        results: vec![
            ContextReport {
                display_name: "a [SingleRuntime]".into(),
                topology: Topology::SingleRuntime,
                outcome: ContextOutcome::Passed,
            },
            ContextReport {
                display_name: "a [MultiPlatformRuntime]".into(),
                topology: Topology::MultiPlatformRuntime,
                outcome: ContextOutcome::FixtureError(TestFixtureError::LaunchFailed("x".into())),
            },
        ],
    };
    assert!(!report.is_success());
    assert_eq!((report.passed(), report.failed(), report.fixture_errors()), (1, 0, 1));
    assert!(report.to_string().ends_with("1 passed, 0 failed, 1 fixture errors"));
}

// ============================================================================
// fixtures
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hot_reload_applies_in_every_topology() {
    let report = MatrixRunner::new()
        .run(
            &[ParentContext::hot_reload("edit greeting")],
            &[ParamKind::Fixture],
            edit_greeting,
        )
        .await;

    assert!(report.is_success(), "{report}");
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].topology, Topology::SingleRuntime);
    assert_eq!(report.results[1].topology, Topology::MultiPlatformRuntime);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_screenshot_scenarios_see_the_change() {
    let report = MatrixRunner::new()
        .with_topologies(&[Topology::SingleRuntime])
        .run(
            &[ParentContext::hot_reload("plain"), ParentContext::screenshot("shot")],
            &[ParamKind::Fixture],
            compare_screens,
        )
        .await;

    assert!(report.is_success(), "{report}");
    assert_eq!(report.results.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_bodies_do_not_affect_siblings() {
    let report = MatrixRunner::new()
        .with_topologies(&[Topology::SingleRuntime])
        .run(
            &[
                ParentContext::hot_reload("ok"),
                ParentContext::hot_reload("boom"),
                ParentContext::hot_reload("wrong"),
            ],
            &[ParamKind::Fixture],
            by_name,
        )
        .await;

    assert_eq!(report.passed(), 1);
    assert_eq!(report.failed(), 2);
    assert_eq!(
        report.get("ok [SingleRuntime]").map(|r| &r.outcome),
        Some(&ContextOutcome::Passed)
    );
    assert_eq!(
        report.get("boom [SingleRuntime]").map(|r| &r.outcome),
        Some(&ContextOutcome::Failed("panicked: exploded".into()))
    );
    assert_eq!(
        report.get("wrong [SingleRuntime]").map(|r| &r.outcome),
        Some(&ContextOutcome::Failed("expected 2 units, got 1".into()))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ready_parameter_yields_until_setup() {
    let report = MatrixRunner::new()
        .run(
            &[ParentContext::hot_reload("suspended")],
            &[ParamKind::Ready, ParamKind::Ready],
            await_ready,
        )
        .await;

    assert!(report.is_success(), "{report}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_teardown_closes_every_session() {
    let fixtures: Arc<Mutex<Vec<Arc<Fixture>>>> = Arc::default();
    let seen = Arc::clone(&fixtures);

    let report = MatrixRunner::new()
        .with_grace(Duration::from_secs(2))
        .run(
            &[ParentContext::hot_reload("teardown")],
            &[ParamKind::Fixture],
            move |invocation| keep_and_fail(invocation, Arc::clone(&seen)),
        )
        .await;

    assert_eq!(report.failed(), 2);
    let fixtures = fixtures.lock();
    assert_eq!(fixtures.len(), 2);
    for fixture in fixtures.iter() {
        let bus = fixture.bus();
        assert!(bus.is_shut_down());
        for session in [fixture.application(), fixture.observer(), fixture.compiler()] {
            assert_eq!(bus.state(session), Some(SessionState::Closed), "{session}");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fixture_tasks_stop_within_grace() {
    let context = InvocationContext {
        parent: ParentContext::hot_reload("direct"),
        topology: Topology::MultiPlatformRuntime,
    };
    let fixture = Fixture::launch(&context, FixtureSettings::default()).unwrap();
    assert!(fixture.classes_dir().ends_with("build/classes/kotlin/jvm/main"));
    assert!(fixture.classes_dir().join("app/MainKt.class").is_file());

    let forced = fixture.teardown(Duration::from_secs(2)).await;
    assert_eq!(forced, 0);
}
