//! Bounded retry for transient BLE failures.

use std::future::Future;
use std::time::Duration;

use crate::NiimbotError;

/// Default number of attempts (one try plus one retry).
pub(crate) const RETRY_COUNT: usize = 2;
pub(crate) const RETRY_DELAY: Duration = Duration::from_millis(200);

/// How often a transient write or connect failure is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: usize,
    /// Delay before the n-th retry is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: RETRY_COUNT,
            backoff: RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub(crate) async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> crate::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(err) if attempt < attempts && is_transient(&err) => {
                    tracing::warn!(what, attempt, error = %err, "Transient BLE failure, retrying");
                    tokio::time::sleep(self.backoff * attempt as u32).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Errors worth a second attempt: radio-level write/connect hiccups.
pub(crate) fn is_transient(err: &NiimbotError) -> bool {
    match err {
        NiimbotError::BleWrite(_) => true,
        NiimbotError::BleConnection(msg) => {
            let msg = msg.to_ascii_lowercase();
            !msg.contains("not found") && !msg.contains("no ble adapter")
        }
        _ => false,
    }
}
