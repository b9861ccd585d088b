//! Failure classification and retry policy
//!
//! A failed provider call falls into one of three classes:
//! - rate limited: wait the advisory time (or a default), retry exactly once
//! - transient (overload, timeout): exponential backoff, up to `max_retries`
//! - terminal: no retry
//!
//! Outcomes are only counted after [`RetryPolicy::execute`] returns, so a
//! subject is never tallied as both a failure and a success.

use crate::config::EngineSettings;
use crate::error::{EvaluationError, ProviderError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Verdict for one failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Provider throttled us; wait this long then retry once
    RateLimited { wait: Duration },
    /// Provider busy or slow; retry with backoff
    Transient,
    /// Retrying cannot help
    Terminal,
}

/// Retry limits and wait times
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub default_rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(60),
            default_rate_limit_wait: Duration::from_secs(60),
        }
    }
}

/// Final result of a call after the policy resolved
#[derive(Debug)]
pub struct Attempted<T> {
    pub outcome: Result<T, EvaluationError>,
    /// Retries performed after the first call
    pub retry_count: u32,
}

impl RetryPolicy {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            backoff_base: Duration::from_secs(settings.backoff_base_secs),
            default_rate_limit_wait: Duration::from_secs(settings.default_rate_limit_wait_secs),
        }
    }

    pub fn classify(&self, err: &EvaluationError) -> FailureClass {
        match err {
            EvaluationError::Provider(ProviderError::RateLimited { retry_after, .. }) => {
                FailureClass::RateLimited {
                    wait: retry_after.unwrap_or(self.default_rate_limit_wait),
                }
            }
            EvaluationError::Provider(ProviderError::Overloaded { .. })
            | EvaluationError::Provider(ProviderError::Timeout(_)) => FailureClass::Transient,
            _ => FailureClass::Terminal,
        }
    }

    /// Wait before backoff retry `attempt` (0-based): `base * 2^attempt`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `op`, retrying according to the policy.
    ///
    /// `notify` receives a status line before every wait. Cancellation during
    /// a wait stops retrying and returns [`EvaluationError::Cancelled`]
    /// wrapping the last error.
    pub async fn execute<T, F, Fut, N>(
        &self,
        mut op: F,
        cancel: &CancellationToken,
        mut notify: N,
    ) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EvaluationError>>,
        N: FnMut(String),
    {
        let err = match op().await {
            Ok(value) => {
                return Attempted {
                    outcome: Ok(value),
                    retry_count: 0,
                }
            }
            Err(err) => err,
        };

        match self.classify(&err) {
            FailureClass::Terminal => Attempted {
                outcome: Err(err),
                retry_count: 0,
            },

            FailureClass::RateLimited { wait } => {
                notify(format!(
                    "Rate limited, waiting {} seconds (retry 1/1)",
                    wait.as_secs()
                ));
                if !pause(wait, cancel).await {
                    debug!("Cancelled during rate-limit wait");
                    return Attempted {
                        outcome: Err(EvaluationError::Cancelled(Box::new(err))),
                        retry_count: 0,
                    };
                }
                Attempted {
                    outcome: op().await,
                    retry_count: 1,
                }
            }

            FailureClass::Transient => {
                let mut last = err;
                for attempt in 0..self.max_retries {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "Transient provider failure ({}), retry {}/{} in {:?}",
                        last.code(),
                        attempt + 1,
                        self.max_retries,
                        delay
                    );
                    notify(format!(
                        "Provider busy, waiting {} seconds (retry {}/{})",
                        delay.as_secs(),
                        attempt + 1,
                        self.max_retries
                    ));

                    if !pause(delay, cancel).await {
                        debug!("Cancelled during backoff wait");
                        return Attempted {
                            outcome: Err(EvaluationError::Cancelled(Box::new(last))),
                            retry_count: attempt,
                        };
                    }

                    match op().await {
                        Ok(value) => {
                            return Attempted {
                                outcome: Ok(value),
                                retry_count: attempt + 1,
                            }
                        }
                        Err(e) => {
                            let class = self.classify(&e);
                            last = e;
                            if class == FailureClass::Terminal {
                                return Attempted {
                                    outcome: Err(last),
                                    retry_count: attempt + 1,
                                };
                            }
                        }
                    }
                }

                Attempted {
                    outcome: Err(last),
                    retry_count: self.max_retries,
                }
            }
        }
    }
}

/// Sleep unless cancelled first; returns false on cancellation
async fn pause(wait: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(wait) => true,
    }
}
