//! Timeout and retry wrapper for calls into embedding providers and stores.
//!
//! Only errors that report [`TianyiError::is_retryable`] are retried. Every
//! write in this crate is an upsert keyed by id, so repeating one is harmless.

use std::future::Future;
use std::time::Duration;

use tianyi_config::IoConfig;
use tianyi_core::{Result, TianyiError};
use tracing::warn;

const MAX_DELAY: Duration = Duration::from_secs(10);

/// Run `op`, retrying retryable failures up to `attempts` extra times with
/// exponential backoff starting at `initial_delay`.
pub async fn with_retry<T, F, Fut>(attempts: u32, initial_delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && e.is_retryable() => {
                attempt += 1;
                warn!(
                    attempt,
                    max_retries = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying memory I/O"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Per-call timeout plus retry settings.
#[derive(Debug, Clone, Copy)]
pub struct IoPolicy {
    pub timeout: Duration,
    pub attempts: u32,
    pub initial_delay: Duration,
}

impl Default for IoPolicy {
    fn default() -> Self {
        Self::from_config(&IoConfig::default())
    }
}

impl IoPolicy {
    pub fn from_config(config: &IoConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
            attempts: config.retry_attempts,
            initial_delay: Duration::from_millis(config.retry_initial_delay_ms),
        }
    }

    /// No retries, short timeout.
    pub fn fail_fast(timeout: Duration) -> Self {
        Self {
            timeout,
            attempts: 0,
            initial_delay: Duration::ZERO,
        }
    }

    /// Run one call under the timeout, retrying per policy. A timeout becomes
    /// `on_timeout(message)`, so it counts as the matching unavailability.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        on_timeout: fn(String) -> TianyiError,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.timeout;
        with_retry(self.attempts, self.initial_delay, || {
            let fut = op();
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(on_timeout(format!("{} timed out after {:?}", what, timeout))),
                }
            }
        })
        .await
    }
}
