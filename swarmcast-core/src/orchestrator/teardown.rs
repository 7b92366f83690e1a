//! Best-effort session teardown.

use std::fmt;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;

use super::StreamOrchestrator;
use crate::session::{Session, SessionId};

/// What triggered a teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownReason {
    ClientRequest,
    IdleTimeout,
    SelectionFailed,
    PackagerFailed,
    SwarmFailed,
    Shutdown,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeardownReason::ClientRequest => "client request",
            TeardownReason::IdleTimeout => "idle timeout",
            TeardownReason::SelectionFailed => "selection failed",
            TeardownReason::PackagerFailed => "packager failed",
            TeardownReason::SwarmFailed => "swarm failed",
            TeardownReason::Shutdown => "shutdown",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStep {
    StopPackager,
    DestroySwarm,
    RemoveOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownFailure {
    pub step: TeardownStep,
    pub reason: String,
}

/// Outcome of one teardown. Step failures are collected, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownReport {
    pub session_id: SessionId,
    pub reason: TeardownReason,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    fn new(session_id: SessionId, reason: TeardownReason) -> Self {
        Self {
            session_id,
            reason,
            failures: Vec::new(),
        }
    }

    fn record(&mut self, step: TeardownStep, reason: impl Into<String>) {
        self.failures.push(TeardownFailure {
            step,
            reason: reason.into(),
        });
    }

    /// True when every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl StreamOrchestrator {
    /// Releases everything a removed session holds.
    ///
    /// Runs every step regardless of earlier failures: stop background work,
    /// stop the packager, destroy the swarm handle, delete the output
    /// directory.
    pub(super) async fn teardown(
        &self,
        mut session: Session,
        reason: TeardownReason,
    ) -> TeardownReport {
        let session_id = session.id().clone();
        tracing::info!(session_id = %session_id, %reason, "Tearing down session");

        let mut report = TeardownReport::new(session_id.clone(), reason);
        let grace = self.inner.config.session.teardown_grace;

        session.cancel_token().cancel();

        if let Some(mut task) = session.packager_task.take() {
            task.stop.cancel();
            match tokio::time::timeout(grace, &mut task.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => report.record(TeardownStep::StopPackager, e.to_string()),
                Err(_) => {
                    task.handle.abort();
                    report.record(
                        TeardownStep::StopPackager,
                        format!("packager did not stop within {}ms", grace.as_millis()),
                    );
                }
            }
        }

        match tokio::time::timeout(grace, session.engine().destroy()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => report.record(TeardownStep::DestroySwarm, e.to_string()),
            Err(_) => report.record(
                TeardownStep::DestroySwarm,
                format!("swarm did not stop within {}ms", grace.as_millis()),
            ),
        }

        if let Some(dir) = session.stream_dir.take()
            && let Err(e) = remove_output_dir(&dir).await
        {
            report.record(
                TeardownStep::RemoveOutput,
                format!("{}: {e}", dir.display()),
            );
        }

        if report.is_clean() {
            tracing::info!(session_id = %session_id, "Session torn down");
        } else {
            tracing::warn!(
                session_id = %session_id,
                failures = ?report.failures,
                "Session torn down with errors"
            );
        }
        report
    }
}

/// Removes a stream directory. A directory that is already gone is fine.
pub(super) async fn remove_output_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
