use thiserror::Error;

/// Failure to bring up an invocation's fixture. Aborts that invocation only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestFixtureError {
    /// The application instance (or its project) could not be started.
    #[error("application launch failed: {0}")]
    LaunchFailed(String),

    /// The application started but the fixture never became ready.
    #[error("fixture setup failed: {0}")]
    SetupFailed(String),

    /// Setup was abandoned before it signalled readiness.
    #[error("fixture setup cancelled")]
    Cancelled,
}
