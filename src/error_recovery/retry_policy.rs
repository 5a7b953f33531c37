//! Retry policy implementation with exponential backoff
//!
//! The same schedule drives image download attempts and the MQTT session's
//! reconnect delays. Every wait races a [`CancellationToken`] so a shutdown
//! never has to sit out a backoff period.

use crate::error::{DetectorError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Growth factor applied per retry
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::download()
    }
}

impl RetryPolicy {
    /// Image download schedule: 3 attempts, waiting 1s then 2s
    pub fn download() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Broker reconnect schedule: unbounded attempts, doubling up to 2 minutes
    pub fn reconnect() -> Self {
        Self {
            max_attempts: u32::MAX,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            multiplier: 2.0,
        }
    }

    /// Delay to wait after `attempt` failed (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Total time spent waiting if every attempt fails
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.calculate_delay(attempt))
            .sum()
    }
}

/// Retry statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryStats {
    /// Total operations attempted
    pub total_operations: u64,
    /// Successful operations (no retry needed)
    pub successful_first_attempt: u64,
    /// Successful operations (after retry)
    pub successful_after_retry: u64,
    /// Failed operations (all retries exhausted)
    pub failed_after_retries: u64,
    /// Total retry attempts
    pub total_retry_attempts: u64,
    /// Last retry timestamp
    pub last_retry: Option<chrono::DateTime<chrono::Utc>>,
}

/// Runs an operation under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    stats: Arc<RwLock<RetryStats>>,
}

impl RetryExecutor {
    /// Create new retry executor
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            stats: Arc::new(RwLock::new(RetryStats::default())),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute operation with retry policy
    ///
    /// Each attempt and each backoff wait is raced against `cancel`.
    /// Non-retryable errors are returned as-is; when the attempt budget is
    /// exhausted the last error is wrapped in [`DetectorError::Acquisition`].
    pub async fn execute<F, T, Fut>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.stats.write().await.total_operations += 1;

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            if attempt > 1 {
                debug!("Retry attempt {} of {}", attempt, max_attempts);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(DetectorError::cancelled(format!("cancelled during attempt {attempt}")));
                }
                outcome = operation(attempt) => outcome,
            };

            let error = match outcome {
                Ok(result) => {
                    let mut stats = self.stats.write().await;
                    if attempt == 1 {
                        stats.successful_first_attempt += 1;
                    } else {
                        stats.successful_after_retry += 1;
                        info!("Operation succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                debug!("Error not retryable: {}", error);
                return Err(error);
            }

            if attempt >= max_attempts {
                self.stats.write().await.failed_after_retries += 1;
                warn!("Operation failed after {} attempts: {}", attempt, error);
                return Err(DetectorError::acquisition(attempt, error));
            }

            let delay = self.policy.calculate_delay(attempt);
            {
                let mut stats = self.stats.write().await;
                stats.total_retry_attempts += 1;
                stats.last_retry = Some(chrono::Utc::now());
            }

            warn!(
                "Attempt {}/{} failed: {}; retrying in {:?}",
                attempt, max_attempts, error, delay
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(DetectorError::cancelled(format!("cancelled while backing off after attempt {attempt}")));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Get retry statistics
    pub async fn get_stats(&self) -> RetryStats {
        self.stats.read().await.clone()
    }
}

/// Tracks consecutive reconnect failures and hands out the next delay
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before trying again
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.policy.calculate_delay(self.failures)
    }

    /// Forget previous failures after a successful connection
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
