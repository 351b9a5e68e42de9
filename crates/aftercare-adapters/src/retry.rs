//! Per-call timeout and bounded exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use aftercare_core::config::{RetryConfig, TurnConfig};

use crate::error::ServiceError;

/// Timeout and retry policy applied to every external call.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    /// Budget for one attempt.
    pub call_timeout: Duration,
    /// Retries after the first attempt; transient failures only.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::from_config(&TurnConfig::default(), &RetryConfig::default())
    }
}

impl CallPolicy {
    pub fn from_config(turn: &TurnConfig, retry: &RetryConfig) -> Self {
        Self {
            call_timeout: Duration::from_millis(turn.call_timeout_ms),
            max_retries: retry.max_retries,
            initial_backoff: Duration::from_millis(retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(retry.max_backoff_ms),
            multiplier: retry.multiplier,
        }
    }

    /// Delay before retry number `retry` (0-based): `initial * multiplier^retry`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(retry as i32);
        if !millis.is_finite() {
            return self.max_backoff;
        }
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }

    /// Run `operation` under the policy.
    ///
    /// Each attempt is bounded by `call_timeout`; an attempt that runs out of
    /// time counts as `ServiceError::Timeout`. Only retryable errors are
    /// retried. Returns the final result and the number of attempts made.
    pub async fn run<F, Fut, T>(&self, label: &str, operation: F) -> (Result<T, ServiceError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.run_with(label, true, operation).await
    }

    /// Like [`CallPolicy::run`], but a timed-out attempt is only retried when
    /// `retry_timeouts` is set.
    pub async fn run_with<F, Fut, T>(
        &self,
        label: &str,
        retry_timeouts: bool,
        mut operation: F,
    ) -> (Result<T, ServiceError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(self.call_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout(self.call_timeout)),
            };

            let retryable = |err: &ServiceError| match err {
                ServiceError::Timeout(_) => retry_timeouts,
                other => other.is_retryable(),
            };
            match result {
                Err(err) if retryable(&err) && attempts <= self.max_retries => {
                    let delay = self.backoff(attempts - 1);
                    warn!(
                        adapter = label,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying external call"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return (other, attempts),
            }
        }
    }
}
