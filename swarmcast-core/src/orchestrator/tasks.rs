//! Background tasks owned by a session.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{StreamOrchestrator, TeardownReason};
use crate::packager::PackagingProcess;
use crate::session::{PackagerTask, SessionId};
use crate::swarm::SwarmHandle;

impl StreamOrchestrator {
    /// Destroys the session if nothing is selected before the idle window ends.
    pub(super) fn spawn_idle_timer(&self, session_id: SessionId, idle: CancellationToken) {
        let this = self.clone();
        let window = self.inner.config.session.idle_timeout;

        tokio::spawn(async move {
            tokio::select! {
                _ = idle.cancelled() => {
                    tracing::trace!(session_id = %session_id, "Idle timer disarmed");
                }
                _ = tokio::time::sleep(window) => {
                    let expired = this
                        .inner
                        .registry
                        .destroy_if(&session_id, |session| !session.is_selected());
                    if let Some(session) = expired {
                        tracing::info!(
                            session_id = %session_id,
                            "No file selected within {}s",
                            window.as_secs()
                        );
                        this.teardown(session, TeardownReason::IdleTimeout).await;
                    }
                }
            }
        });
    }

    /// Watches the packager until it exits or `stop` fires.
    ///
    /// A clean exit leaves the session active with a complete playlist. A
    /// failed exit tears the session down from a separate task, since
    /// teardown awaits this one.
    pub(super) fn spawn_packager_supervisor(
        &self,
        session_id: SessionId,
        mut process: Box<dyn PackagingProcess>,
        stop: CancellationToken,
    ) -> PackagerTask {
        let this = self.clone();
        let token = stop.clone();

        let handle = tokio::spawn(async move {
            let exit = tokio::select! {
                _ = token.cancelled() => None,
                result = process.wait() => Some(result),
            };

            match exit {
                None => {
                    if let Err(e) = process.stop().await {
                        tracing::warn!(session_id = %session_id, "Failed to stop packager: {}", e);
                    }
                }
                Some(Ok(())) => {
                    tracing::info!(session_id = %session_id, "Packager finished, playlist complete");
                }
                Some(Err(e)) => {
                    tracing::error!(session_id = %session_id, "Packager failed: {}", e);
                    tokio::spawn(async move {
                        this.destroy_session(&session_id, TeardownReason::PackagerFailed)
                            .await;
                    });
                }
            }
        });

        PackagerTask { stop, handle }
    }

    /// Refreshes the session's metrics snapshot until cancelled.
    pub(super) fn spawn_metrics_sampler(
        &self,
        session_id: SessionId,
        engine: Arc<dyn SwarmHandle>,
        cancel: CancellationToken,
    ) {
        let this = self.clone();
        let period = self.inner.config.metrics.sample_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let sample = tokio::select! {
                    _ = cancel.cancelled() => break,
                    sample = engine.counters() => sample,
                };

                match sample {
                    Ok(counters) => {
                        let recorded = this
                            .inner
                            .registry
                            .update(&session_id, |session| session.record_sample(counters));
                        if recorded.is_err() {
                            break;
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        tracing::error!(session_id = %session_id, "Swarm failed: {}", e);
                        this.destroy_session(&session_id, TeardownReason::SwarmFailed)
                            .await;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, "Failed to sample swarm: {}", e);
                    }
                }
            }
            tracing::trace!(session_id = %session_id, "Metrics sampler stopped");
        });
    }
}
