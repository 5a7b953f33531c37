//! Fixed-interval measure and publish loop

use crate::acquisition::{ImageAcquirer, Lux};
use crate::error::{DetectorError, Result};
use crate::log_structured_error;
use crate::mqtt::{DiscoveryPublisher, MqttTransport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Produces one lux reading per call
#[async_trait]
pub trait LuxSource: Send + Sync {
    async fn read_lux(&self, cancel: &CancellationToken) -> Result<Lux>;
}

/// Accepts lux readings
#[async_trait]
pub trait LuxSink: Send + Sync {
    async fn publish_lux(&self, lux: Lux, cancel: &CancellationToken) -> Result<()>;
}

#[async_trait]
impl LuxSource for ImageAcquirer {
    async fn read_lux(&self, cancel: &CancellationToken) -> Result<Lux> {
        self.process(cancel).await
    }
}

#[async_trait]
impl<T: MqttTransport> LuxSink for DiscoveryPublisher<T> {
    async fn publish_lux(&self, lux: Lux, cancel: &CancellationToken) -> Result<()> {
        DiscoveryPublisher::publish_lux(self, lux, cancel).await
    }
}

/// How many failed cycles in a row end the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePolicy {
    max_consecutive_failures: u32,
}

impl Default for FailurePolicy {
    /// Stop on the first failed cycle
    fn default() -> Self {
        Self {
            max_consecutive_failures: 1,
        }
    }
}

impl FailurePolicy {
    pub fn new(max_consecutive_failures: u32) -> Result<Self> {
        if max_consecutive_failures == 0 {
            return Err(DetectorError::config(
                "max consecutive failures must be at least 1",
            ));
        }
        Ok(Self {
            max_consecutive_failures,
        })
    }

    pub fn max_consecutive_failures(&self) -> u32 {
        self.max_consecutive_failures
    }

    fn is_exhausted(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.max_consecutive_failures
    }
}

/// Counters describing the loop so far
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollerStats {
    pub cycles: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_lux: Option<Lux>,
    pub last_success: Option<DateTime<Utc>>,
}

/// Runs one measure and publish cycle per interval
pub struct Poller<S: LuxSource, K: LuxSink> {
    source: S,
    sink: Arc<K>,
    interval: Duration,
    policy: FailurePolicy,
    stats: Arc<RwLock<PollerStats>>,
}

impl<S: LuxSource, K: LuxSink> Poller<S, K> {
    pub fn new(source: S, sink: Arc<K>, interval: Duration, policy: FailurePolicy) -> Self {
        Self {
            source,
            sink,
            interval,
            policy,
            stats: Arc::new(RwLock::new(PollerStats::default())),
        }
    }

    /// Shared handle to the loop statistics
    pub fn stats(&self) -> Arc<RwLock<PollerStats>> {
        self.stats.clone()
    }

    /// Run until cancelled or until the failure policy gives up.
    ///
    /// The first cycle starts one interval after the call. Cycles never
    /// overlap: ticks missed while a cycle runs are skipped, not queued.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval = ?self.interval,
            max_consecutive_failures = self.policy.max_consecutive_failures(),
            "Poll loop started"
        );

        let mut cycle: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(cycles = cycle, "Poll loop stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            cycle += 1;
            match self.run_cycle(cancel).await {
                Ok(lux) => {
                    if consecutive_failures > 0 {
                        info!(cycle, "Recovered after {} failed cycles", consecutive_failures);
                    }
                    consecutive_failures = 0;
                    self.record(cycle, Some(lux), consecutive_failures).await;
                }
                Err(e) if e.is_cancelled() && cancel.is_cancelled() => {
                    debug!(cycle, "Cycle interrupted by shutdown");
                    info!(cycles = cycle, "Poll loop stopped");
                    return Ok(());
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.record(cycle, None, consecutive_failures).await;
                    log_structured_error!(e, "poller", "cycle", cycle);

                    if self.policy.is_exhausted(consecutive_failures) {
                        return Err(e);
                    }
                    warn!(
                        cycle,
                        consecutive_failures,
                        "Cycle failed, continuing with next interval"
                    );
                }
            }
        }
    }

    /// One measurement followed by its publication
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<Lux> {
        let lux = self.source.read_lux(cancel).await?;
        self.sink.publish_lux(lux, cancel).await?;
        Ok(lux)
    }

    async fn record(&self, cycle: u64, lux: Option<Lux>, consecutive_failures: u32) {
        let mut stats = self.stats.write().await;
        stats.cycles = cycle;
        stats.consecutive_failures = consecutive_failures;
        match lux {
            Some(lux) => {
                stats.successes += 1;
                stats.last_lux = Some(lux);
                stats.last_success = Some(Utc::now());
            }
            None => stats.failures += 1,
        }
    }
}
