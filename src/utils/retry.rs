//! Bounded exponential backoff for artifact reads.

use std::io;
use std::time::Duration;

/// `attempts` tries in total; the delay doubles after each failure, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base: Duration::from_millis(100),
            max: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. The last error is returned.
    pub async fn run<T, F>(&self, mut op: F) -> io::Result<T>
    where
        F: FnMut() -> io::Result<T>,
    {
        let mut retry = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if !is_transient(&e) => return Err(e),
                Err(e) if retry + 1 >= self.attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay(retry);
                    crate::debug!("reload"; "io error ({}), retry {}/{} after {:?}", e, retry + 1, self.attempts - 1, delay);
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
            }
        }
    }
}

/// Missing files are an answer, not a failure.
fn is_transient(e: &io::Error) -> bool {
    e.kind() != io::ErrorKind::NotFound
}
