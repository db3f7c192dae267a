//! Test Scenario Matrix
//!
//! Expands parent scenarios across topologies and runs a test body once per
//! resulting context, each against its own [`Fixture`].
//!
//! ```text
//! parents × topologies ──expand──> InvocationContext*
//!                                      │ one task each
//!                                      ▼
//!                    launch ─> body(Invocation) ─> teardown (always)
//!                                      │
//!                                      ▼
//!                                 MatrixReport
//! ```
//!
//! A body asks for its fixture through [`ParamKind`]:
//!
//! - `Fixture`: the body starts after setup and gets the fixture directly.
//! - `Ready`: the body starts at once and awaits a [`Ready`] future.
//!
//! Setup failure is reported as `FixtureError` for that context only. A
//! failing or panicking body is `Failed` for that context only.

mod context;
mod error;
mod fixture;
mod ready;
pub mod visual;

#[cfg(test)]
mod tests;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use owo_colors::OwoColorize;
use tokio::task::JoinError;

pub use context::{InvocationContext, ParentContext, ScenarioKind, expand};
pub use error::TestFixtureError;
pub use fixture::{Fixture, FixtureSettings};
pub use ready::{Ready, ReadySignal};
pub use visual::{Diff, SimulatedScreen, VisualAssertion};

use crate::core::Topology;

/// Bounded wait for a fixture's tasks before they are aborted.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);
pub const DEFAULT_BODY_TIMEOUT: Duration = Duration::from_secs(60);

/// How a body wants its fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Fixture,
    Ready,
}

pub enum Param {
    Fixture(Arc<Fixture>),
    Ready(Ready),
}

/// What a test body receives: its context plus resolved parameters.
pub struct Invocation {
    context: InvocationContext,
    params: Vec<Option<Param>>,
}

impl Invocation {
    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    pub fn display_name(&self) -> String {
        self.context.display_name()
    }

    /// Take the next unclaimed fixture parameter.
    pub fn take_fixture(&mut self) -> Option<Arc<Fixture>> {
        self.params.iter_mut().find_map(|slot| match slot.take() {
            Some(Param::Fixture(fixture)) => Some(fixture),
            other => {
                *slot = other;
                None
            }
        })
    }

    /// Take the next unclaimed readiness parameter.
    pub fn take_ready(&mut self) -> Option<Ready> {
        self.params.iter_mut().find_map(|slot| match slot.take() {
            Some(Param::Ready(ready)) => Some(ready),
            other => {
                *slot = other;
                None
            }
        })
    }
}

// ============================================================================
// report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextOutcome {
    Passed,
    Failed(String),
    FixtureError(TestFixtureError),
}

#[derive(Debug, Clone)]
pub struct ContextReport {
    pub display_name: String,
    pub topology: Topology,
    pub outcome: ContextOutcome,
}

/// Results in expansion order.
#[derive(Debug, Clone, Default)]
pub struct MatrixReport {
    pub results: Vec<ContextReport>,
}

impl MatrixReport {
    pub fn is_success(&self) -> bool {
        self.results
            .iter()
            .all(|r| r.outcome == ContextOutcome::Passed)
    }

    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, ContextOutcome::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ContextOutcome::Failed(_)))
    }

    pub fn fixture_errors(&self) -> usize {
        self.count(|o| matches!(o, ContextOutcome::FixtureError(_)))
    }

    pub fn get(&self, display_name: &str) -> Option<&ContextReport> {
        self.results.iter().find(|r| r.display_name == display_name)
    }

    fn count(&self, pred: impl Fn(&ContextOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

impl fmt::Display for MatrixReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.results {
            match &report.outcome {
                ContextOutcome::Passed => writeln!(f, "{} {}", "✓".green(), report.display_name)?,
                ContextOutcome::Failed(reason) => {
                    writeln!(f, "{} {}: {}", "✗".red(), report.display_name, reason)?
                }
                ContextOutcome::FixtureError(e) => {
                    writeln!(f, "{} {}: {}", "!".yellow(), report.display_name, e)?
                }
            }
        }
        write!(
            f,
            "{} passed, {} failed, {} fixture errors",
            self.passed(),
            self.failed(),
            self.fixture_errors()
        )
    }
}

// ============================================================================
// runner
// ============================================================================

#[derive(Debug, Clone)]
pub struct MatrixRunner {
    topologies: Vec<Topology>,
    grace: Duration,
    body_timeout: Duration,
    settings: FixtureSettings,
}

impl Default for MatrixRunner {
    fn default() -> Self {
        Self {
            topologies: Topology::ALL.to_vec(),
            grace: DEFAULT_GRACE,
            body_timeout: DEFAULT_BODY_TIMEOUT,
            settings: FixtureSettings::default(),
        }
    }
}

impl MatrixRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topologies(mut self, topologies: &[Topology]) -> Self {
        self.topologies = topologies.to_vec();
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_body_timeout(mut self, timeout: Duration) -> Self {
        self.body_timeout = timeout;
        self
    }

    pub fn with_settings(mut self, settings: FixtureSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn expand(&self, parents: &[ParentContext]) -> Vec<InvocationContext> {
        expand(parents, &self.topologies)
    }

    /// Run `body` once per context, all contexts concurrently.
    pub async fn run<F, Fut>(
        &self,
        parents: &[ParentContext],
        params: &[ParamKind],
        body: F,
    ) -> MatrixReport
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let body = Arc::new(body);
        let contexts = self.expand(parents);
        crate::debug!("matrix"; "{} parents x {} topologies = {} contexts",
            parents.len(), self.topologies.len(), contexts.len());

        let handles: Vec<_> = contexts
            .into_iter()
            .map(|context| {
                let cell = Cell {
                    context: context.clone(),
                    params: params.to_vec(),
                    runner: self.clone(),
                };
                let body = Arc::clone(&body);
                let handle = tokio::spawn(async move { cell.run(body).await });
                (context, handle)
            })
            .collect();

        let mut report = MatrixReport::default();
        for (context, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| ContextOutcome::Failed(describe_join(e)));
            crate::debug!("matrix"; "{}: {:?}", context, outcome);
            report.results.push(ContextReport {
                display_name: context.display_name(),
                topology: context.topology,
                outcome,
            });
        }
        report
    }
}

/// One context's lifecycle.
struct Cell {
    context: InvocationContext,
    params: Vec<ParamKind>,
    runner: MatrixRunner,
}

impl Cell {
    async fn run<F, Fut>(self, body: Arc<F>) -> ContextOutcome
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (signal, ready) = ready::channel();
        let mut ready = Some(ready);

        if self.params.contains(&ParamKind::Fixture) {
            // The body needs the fixture itself; set up first
            let fixture = match Fixture::launch(&self.context, self.runner.settings) {
                Ok(fixture) => Arc::new(fixture),
                Err(e) => {
                    signal.fail(e.clone());
                    return ContextOutcome::FixtureError(e);
                }
            };
            signal.ready(Arc::clone(&fixture));
            let invocation = self.invocation(Some(&fixture), &mut ready);
            let outcome = self.run_body(&body, invocation).await;
            fixture.teardown(self.runner.grace).await;
            return outcome;
        }

        // Only readiness requested: the body runs while setup proceeds
        let invocation = self.invocation(None, &mut ready);
        let body_task = tokio::spawn((*body)(invocation));
        tokio::task::yield_now().await;

        match Fixture::launch(&self.context, self.runner.settings) {
            Ok(fixture) => {
                let fixture = Arc::new(fixture);
                signal.ready(Arc::clone(&fixture));
                let outcome = self.await_body(body_task).await;
                fixture.teardown(self.runner.grace).await;
                outcome
            }
            Err(e) => {
                signal.fail(e.clone());
                // The body sees the failure; give it the grace period to end
                let mut body_task = body_task;
                if tokio::time::timeout(self.runner.grace, &mut body_task).await.is_err() {
                    body_task.abort();
                }
                ContextOutcome::FixtureError(e)
            }
        }
    }

    /// Resolve parameters in declaration order. Only the first `Ready` is
    /// wired to setup; later ones resolve as cancelled.
    fn invocation(&self, fixture: Option<&Arc<Fixture>>, ready: &mut Option<Ready>) -> Invocation {
        let params = self
            .params
            .iter()
            .map(|kind| match kind {
                ParamKind::Fixture => fixture.map(|f| Param::Fixture(Arc::clone(f))),
                ParamKind::Ready => Some(Param::Ready(ready.take().unwrap_or_else(|| {
                    let (_, cancelled) = ready::channel();
                    cancelled
                }))),
            })
            .collect();
        Invocation {
            context: self.context.clone(),
            params,
        }
    }

    async fn run_body<F, Fut>(&self, body: &Arc<F>, invocation: Invocation) -> ContextOutcome
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.await_body(tokio::spawn((**body)(invocation))).await
    }

    async fn await_body(
        &self,
        mut task: tokio::task::JoinHandle<anyhow::Result<()>>,
    ) -> ContextOutcome {
        match tokio::time::timeout(self.runner.body_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => ContextOutcome::Passed,
            Ok(Ok(Err(e))) => ContextOutcome::Failed(format!("{e:#}")),
            Ok(Err(e)) => ContextOutcome::Failed(describe_join(e)),
            Err(_) => {
                task.abort();
                ContextOutcome::Failed(format!("timed out after {:?}", self.runner.body_timeout))
            }
        }
    }
}

fn describe_join(e: JoinError) -> String {
    if e.is_panic() {
        format!("panicked: {}", panic_message(e.into_panic()))
    } else {
        "cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map_or_else(|| "unknown panic".to_string(), |s| (*s).to_string()),
    }
}
