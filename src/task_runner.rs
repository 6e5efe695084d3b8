//! Retry and backoff helpers shared by the feed reconnect loop and order
//! submission. Transient failures are retried with exponential backoff;
//! anything else surfaces immediately.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::domain::errors::{EngineError, EngineResult};

/// Capped exponential backoff state.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Backoff {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to sleep before the next attempt. Doubles on every call,
    /// capped at the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Run `operation` up to `max_retries + 1` times. Only transient errors are
/// retried; the delay doubles after each failed attempt. Exhaustion returns
/// the last error - callers log it and move on, nothing panics.
pub async fn retry_with_backoff<T, F, Fut>(
    operation_name: &str,
    max_retries: u32,
    initial_delay: Duration,
    mut operation: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut backoff = Backoff::new(initial_delay, Duration::from_secs(10));
    let mut last_error = EngineError::InvalidInput(format!("{} never ran", operation_name));

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries => {
                let delay = backoff.next_delay();
                warn!(
                    "{} attempt {} failed: {}. Retrying in {:?}",
                    operation_name,
                    attempt + 1,
                    e,
                    delay
                );
                sleep(delay).await;
                last_error = e;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error)
}
