//! Readiness gate between file selection and packager launch.
//!
//! Starting the packager against a swarm that has not delivered any bytes
//! makes FFmpeg fail on an empty input. The gate polls swarm counters until
//! data flows, re-announcing while the swarm has no peers, and gives up after
//! a bounded number of re-announces or a hard deadline.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ReadinessConfig;
use crate::swarm::{SwarmCounters, SwarmStats};

/// Why the gate did not open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadinessError {
    #[error("No peers found after {attempts} re-announce attempts")]
    NoPeers {
        attempts: u32,
        counters: SwarmCounters,
    },

    #[error("No data received within {}s", waited.as_secs())]
    Timeout {
        waited: Duration,
        counters: SwarmCounters,
    },

    #[error("Swarm failed while waiting for data: {reason}")]
    SwarmFailed {
        reason: String,
        counters: SwarmCounters,
    },

    #[error("Readiness wait cancelled")]
    Cancelled,
}

impl ReadinessError {
    /// Last counters observed before giving up.
    pub fn counters(&self) -> Option<SwarmCounters> {
        match self {
            ReadinessError::NoPeers { counters, .. }
            | ReadinessError::Timeout { counters, .. }
            | ReadinessError::SwarmFailed { counters, .. } => Some(*counters),
            ReadinessError::Cancelled => None,
        }
    }
}

/// What to do after one counter sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessDecision {
    /// Data is flowing
    Ready,
    /// Stalled with retries left
    Reannounce { attempt: u32 },
    /// Peers present but no data yet
    Wait,
    /// Stalled with the retry budget exhausted
    GiveUp,
}

/// Pure retry policy, independent of timing and I/O.
#[derive(Debug, Clone)]
pub struct ReadinessTracker {
    retry_budget: u32,
    reannounces: u32,
}

impl ReadinessTracker {
    pub fn new(retry_budget: u32) -> Self {
        Self {
            retry_budget,
            reannounces: 0,
        }
    }

    /// Feeds one sample into the policy.
    pub fn observe(&mut self, counters: &SwarmCounters) -> ReadinessDecision {
        if counters.has_data() {
            return ReadinessDecision::Ready;
        }
        if !counters.is_stalled() {
            return ReadinessDecision::Wait;
        }
        if self.reannounces >= self.retry_budget {
            return ReadinessDecision::GiveUp;
        }
        self.reannounces += 1;
        ReadinessDecision::Reannounce {
            attempt: self.reannounces,
        }
    }

    pub fn reannounces(&self) -> u32 {
        self.reannounces
    }
}

/// Successful gate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessOutcome {
    pub counters: SwarmCounters,
    pub polls: u32,
    pub reannounces: u32,
    pub elapsed: Duration,
}

/// Polls swarm counters until payload bytes arrive.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    config: ReadinessConfig,
}

impl ReadinessGate {
    pub fn new(config: ReadinessConfig) -> Self {
        Self { config }
    }

    /// Waits until `stats` reports downloaded bytes.
    ///
    /// The first poll happens immediately. Every sample is handed to
    /// `on_sample` before the policy decides.
    ///
    /// # Errors
    /// - `ReadinessError::NoPeers` - Retry budget exhausted with zero peers
    /// - `ReadinessError::Timeout` - Overall deadline reached
    /// - `ReadinessError::SwarmFailed` - Counters could not be read
    /// - `ReadinessError::Cancelled` - `cancel` fired
    pub async fn wait<S>(
        &self,
        stats: &S,
        cancel: &CancellationToken,
        mut on_sample: impl FnMut(&SwarmCounters) + Send,
    ) -> Result<ReadinessOutcome, ReadinessError>
    where
        S: SwarmStats + ?Sized,
    {
        let started = Instant::now();
        let deadline = tokio::time::sleep(self.config.overall_timeout);
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut tracker = ReadinessTracker::new(self.config.retry_budget);
        let mut last = SwarmCounters::default();
        let mut polls = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ReadinessError::Cancelled),
                _ = &mut deadline => {
                    return Err(ReadinessError::Timeout { waited: started.elapsed(), counters: last });
                }
                _ = ticker.tick() => {}
            }

            let sample = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ReadinessError::Cancelled),
                _ = &mut deadline => {
                    return Err(ReadinessError::Timeout { waited: started.elapsed(), counters: last });
                }
                sample = stats.counters() => sample,
            };

            let counters = sample.map_err(|e| ReadinessError::SwarmFailed {
                reason: e.to_string(),
                counters: last,
            })?;
            polls += 1;
            last = counters;
            on_sample(&counters);

            match tracker.observe(&counters) {
                ReadinessDecision::Ready => {
                    tracing::info!(
                        bytes = counters.bytes_downloaded,
                        peers = counters.peer_count,
                        polls,
                        "Swarm delivering data"
                    );
                    return Ok(ReadinessOutcome {
                        counters,
                        polls,
                        reannounces: tracker.reannounces(),
                        elapsed: started.elapsed(),
                    });
                }
                ReadinessDecision::Reannounce { attempt } => {
                    tracing::warn!(
                        attempt,
                        budget = self.config.retry_budget,
                        "No peers connected, re-announcing"
                    );
                    if let Err(e) = stats.reannounce().await {
                        tracing::warn!("Re-announce failed: {}", e);
                    }
                }
                ReadinessDecision::Wait => {
                    tracing::debug!(peers = counters.peer_count, "Peers connected, waiting for data");
                }
                ReadinessDecision::GiveUp => {
                    tracing::warn!(
                        attempts = tracker.reannounces(),
                        "No peers after exhausting re-announce budget"
                    );
                    return Err(ReadinessError::NoPeers {
                        attempts: tracker.reannounces(),
                        counters,
                    });
                }
            }
        }
    }
}
