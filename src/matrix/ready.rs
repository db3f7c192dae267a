//! One-shot "fixture ready" hand-off.
//!
//! Exactly one producer (the setup task) and one consumer (the test body).
//! Dropping the producer without signalling resolves the consumer with
//! [`TestFixtureError::Cancelled`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::error::TestFixtureError;
use super::fixture::Fixture;

type Readiness = Result<Arc<Fixture>, TestFixtureError>;

pub fn channel() -> (ReadySignal, Ready) {
    let (tx, rx) = oneshot::channel();
    (ReadySignal { tx }, Ready { rx })
}

/// Producer half, consumed by signalling.
pub struct ReadySignal {
    tx: oneshot::Sender<Readiness>,
}

impl ReadySignal {
    pub fn ready(self, fixture: Arc<Fixture>) {
        // A consumer that already gave up is fine
        let _ = self.tx.send(Ok(fixture));
    }

    pub fn fail(self, error: TestFixtureError) {
        let _ = self.tx.send(Err(error));
    }
}

/// Resolves once setup completes. Fails if setup failed or was abandoned.
pub struct Ready {
    rx: oneshot::Receiver<Readiness>,
}

impl Future for Ready {
    type Output = Readiness;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| match result {
            Ok(readiness) => readiness,
            Err(_) => Err(TestFixtureError::Cancelled),
        })
    }
}
