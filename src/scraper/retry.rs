use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::error::SessionError;

/// Bounded polling with a fixed pause between attempts. No backoff, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Run `check` until it yields a value or the budget is spent.
    ///
    /// `Ok(None)` and non-terminal errors count as a miss and are retried.
    /// A terminal error (closed session) stops polling immediately.
    pub async fn poll<T, F, Fut>(&self, what: &str, mut check: F) -> Result<Option<T>, SessionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, SessionError>>,
    {
        for attempt in 1..=self.attempts {
            match check(attempt).await {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => {
                    debug!("Waiting for {}... [{}/{}]", what, attempt, self.attempts);
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    debug!("{} attempt {}/{} failed: {}", what, attempt, self.attempts, e);
                }
            }

            if attempt < self.attempts {
                sleep(self.interval).await;
            }
        }

        Ok(None)
    }
}
