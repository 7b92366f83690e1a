//! Stream orchestrator coordinating swarm, readiness gate, and packager.
//!
//! Drives each session through listing, selection, readiness, and packaging,
//! and guarantees that every exit path releases the swarm handle, the
//! packager process, and the stream directory.

mod tasks;
pub mod teardown;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

pub use teardown::{TeardownFailure, TeardownReason, TeardownReport, TeardownStep};

use crate::config::SwarmcastConfig;
use crate::packager::{PackagingJob, SegmentPackager};
use crate::readiness::{ReadinessError, ReadinessGate};
use crate::session::{
    SelectionDecision, SelectionGrant, SessionError, SessionId, SessionRegistry, StreamId,
    StreamTicket,
};
use crate::status::StatusReport;
use crate::swarm::{ContentDescriptor, MediaFileRef, SwarmEngine, media_files};

/// Result of a successful listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListing {
    pub session_id: SessionId,
    /// Media files, largest first
    pub files: Vec<MediaFileRef>,
}

/// Entry point for all session operations.
///
/// Cheap to clone; clones share the same registry and collaborators.
#[derive(Clone)]
pub struct StreamOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    config: SwarmcastConfig,
    registry: SessionRegistry,
    swarm: Arc<dyn SwarmEngine>,
    packager: Arc<dyn SegmentPackager>,
    gate: ReadinessGate,
}

impl StreamOrchestrator {
    pub fn new(
        config: SwarmcastConfig,
        swarm: Arc<dyn SwarmEngine>,
        packager: Arc<dyn SegmentPackager>,
    ) -> Self {
        let gate = ReadinessGate::new(config.readiness.clone());
        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                registry: SessionRegistry::new(),
                swarm,
                packager,
                gate,
            }),
        }
    }

    pub fn config(&self) -> &SwarmcastConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Directory receiving the playlist and segments of a stream.
    pub fn stream_dir(&self, stream_id: &StreamId) -> PathBuf {
        self.inner
            .config
            .packager
            .output_root
            .join(stream_id.to_string())
    }

    /// Public URL of a stream's playlist.
    pub fn playlist_url(&self, stream_id: &StreamId) -> String {
        let packager = &self.inner.config.packager;
        format!(
            "{}/{}/{}",
            packager.public_prefix.trim_end_matches('/'),
            stream_id,
            packager.playlist_name
        )
    }

    /// Opens a swarm for `raw_descriptor` and lists its media files.
    ///
    /// Registers a session in the Listed state and arms its idle timer.
    ///
    /// # Errors
    /// - `SessionError::InvalidDescriptor` - Descriptor is empty
    /// - `SessionError::Acquisition` - Swarm could not be opened in time
    /// - `SessionError::NoMediaFiles` - Resource holds no playable files
    pub async fn list_files(&self, raw_descriptor: &str) -> Result<FileListing, SessionError> {
        let descriptor = ContentDescriptor::parse(raw_descriptor).map_err(|e| {
            SessionError::InvalidDescriptor {
                reason: e.to_string(),
            }
        })?;

        tracing::info!(
            descriptor = %descriptor,
            info_hash = descriptor.info_hash().unwrap_or("-"),
            engine = self.inner.swarm.engine_type(),
            "Discovering swarm files"
        );

        let discovery_timeout = self.inner.config.session.discovery_timeout;
        let handle =
            match tokio::time::timeout(discovery_timeout, self.inner.swarm.open(&descriptor)).await
            {
                Ok(Ok(handle)) => handle,
                Ok(Err(e)) => {
                    tracing::warn!(descriptor = %descriptor, "Swarm open failed: {}", e);
                    return Err(SessionError::Acquisition {
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    tracing::warn!(descriptor = %descriptor, "Swarm metadata timed out");
                    return Err(SessionError::Acquisition {
                        reason: format!(
                            "metadata not resolved within {}s",
                            discovery_timeout.as_secs()
                        ),
                    });
                }
            };

        let files = media_files(&handle.files());
        if files.is_empty() {
            if let Err(e) = handle.destroy().await {
                tracing::warn!(descriptor = %descriptor, "Failed to release swarm: {}", e);
            }
            return Err(SessionError::NoMediaFiles {
                descriptor: descriptor.to_string(),
            });
        }

        let session_id = self
            .inner
            .registry
            .create(descriptor, handle, files.clone());
        if let Ok(idle) = self
            .inner
            .registry
            .update(&session_id, |session| session.idle_timer().clone())
        {
            self.spawn_idle_timer(session_id.clone(), idle);
        }

        tracing::info!(
            session_id = %session_id,
            media_files = files.len(),
            "Session listed"
        );
        Ok(FileListing { session_id, files })
    }

    /// Selects one media file and starts packaging it once data flows.
    ///
    /// Repeating the request for the same file returns the same ticket.
    /// Any failure after the selection is accepted destroys the session.
    ///
    /// # Errors
    /// - `SessionError::SessionNotFound` - Unknown session
    /// - `SessionError::FileNotFound` - Index is not a listed media file
    /// - `SessionError::SelectionConflict` - Another file is already selected
    /// - `SessionError::Readiness` - Swarm never delivered data
    /// - `SessionError::Packaging` - Packager failed to start
    /// - `SessionError::TornDown` - Session was destroyed while waiting
    pub async fn select_and_stream(
        &self,
        session_id: &SessionId,
        file_index: usize,
    ) -> Result<StreamTicket, SessionError> {
        let decision = self
            .inner
            .registry
            .update(session_id, |session| session.begin_selection(file_index))??;

        let grant = match decision {
            SelectionDecision::Join(activation) => {
                return self.join_activation(session_id, activation).await;
            }
            SelectionDecision::Proceed(grant) => grant,
        };

        tracing::info!(
            session_id = %session_id,
            file = %grant.file.name,
            index = file_index,
            "File selected, waiting for swarm data"
        );

        match self.activate(session_id, grant).await {
            Ok(ticket) => Ok(ticket),
            Err(err) => {
                tracing::warn!(session_id = %session_id, "Stream activation failed: {}", err);
                self.destroy_session(session_id, TeardownReason::SelectionFailed)
                    .await;
                Err(err)
            }
        }
    }

    async fn join_activation(
        &self,
        session_id: &SessionId,
        mut activation: watch::Receiver<Option<StreamTicket>>,
    ) -> Result<StreamTicket, SessionError> {
        tracing::debug!(session_id = %session_id, "Selection in progress, joining");
        let ticket = activation
            .wait_for(Option::is_some)
            .await
            .map(|ticket| (*ticket).clone());

        match ticket {
            Ok(Some(ticket)) => Ok(ticket),
            _ => Err(SessionError::TornDown {
                session_id: session_id.to_string(),
            }),
        }
    }

    /// Waits for swarm data, then attaches the packager.
    ///
    /// The stream directory is recorded on the session just before the
    /// packager starts, so it briefly exists while the session is still
    /// `AwaitingReadiness`. Teardown removes it from either state.
    async fn activate(
        &self,
        session_id: &SessionId,
        grant: SelectionGrant,
    ) -> Result<StreamTicket, SessionError> {
        let SelectionGrant {
            engine,
            file,
            cancel,
        } = grant;
        let registry = &self.inner.registry;
        let torn_down = || SessionError::TornDown {
            session_id: session_id.to_string(),
        };

        engine
            .select_exclusive(file.index)
            .await
            .map_err(|e| SessionError::Acquisition {
                reason: e.to_string(),
            })?;

        let readiness = self
            .inner
            .gate
            .wait(engine.as_ref(), &cancel, |counters| {
                // A vanished session fires `cancel`, which ends the wait
                registry
                    .update(session_id, |session| session.record_sample(*counters))
                    .ok();
            })
            .await;
        let readiness = match readiness {
            Ok(outcome) => outcome,
            Err(ReadinessError::Cancelled) => return Err(torn_down()),
            Err(e) => return Err(e.into()),
        };
        let counters = Some(readiness.counters);

        let stream_id = StreamId::new(session_id.clone(), file.index);
        let output_dir = self.stream_dir(&stream_id);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| SessionError::Packaging {
                reason: format!("cannot create {}: {e}", output_dir.display()),
                counters,
            })?;

        let recorded = registry.update(session_id, |session| {
            session.stream_dir = Some(output_dir.clone());
        });
        if recorded.is_err() {
            let _ = teardown::remove_output_dir(&output_dir).await;
            return Err(torn_down());
        }

        let source = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(torn_down()),
            source = engine.stream_source(file.index) => source,
        };
        let source = source.map_err(|e| SessionError::Acquisition {
            reason: e.to_string(),
        })?;

        let job = PackagingJob {
            stream_id: stream_id.to_string(),
            source,
            playlist_path: output_dir.join(self.inner.config.packager.playlist_name),
            output_dir: output_dir.clone(),
        };

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(torn_down()),
            started = self.inner.packager.start(job) => started,
        };
        let process = started.map_err(|e| SessionError::Packaging {
            reason: e.to_string(),
            counters,
        })?;

        let progress = process.progress();
        let mut task = Some(self.spawn_packager_supervisor(
            session_id.clone(),
            process,
            cancel.child_token(),
        ));
        let ticket = StreamTicket {
            playlist_url: self.playlist_url(&stream_id),
            stream_id,
            file_name: file.name.clone(),
        };

        let activated = registry.update(session_id, |session| {
            if let Some(task) = task.take() {
                session.activate(ticket.clone(), task, progress);
            }
        });
        if activated.is_err() {
            if let Some(task) = task.take() {
                task.stop.cancel();
                let _ = task.handle.await;
            }
            let _ = teardown::remove_output_dir(&output_dir).await;
            return Err(torn_down());
        }

        self.spawn_metrics_sampler(session_id.clone(), engine, cancel);

        tracing::info!(
            session_id = %session_id,
            stream_id = %ticket.stream_id,
            playlist = %ticket.playlist_url,
            "Stream active"
        );
        Ok(ticket)
    }

    /// Current status of a session, read from its last metrics sample.
    ///
    /// # Errors
    /// - `SessionError::SessionNotFound` - Unknown session
    pub fn status(&self, session_id: &SessionId) -> Result<StatusReport, SessionError> {
        let snapshot = self.inner.registry.get(session_id)?;
        Ok(StatusReport::project(&snapshot))
    }

    /// Destroys the session owning `stream_id`.
    ///
    /// Only the part before the first `_` is used to find the session.
    ///
    /// # Errors
    /// - `SessionError::MissingField` - Stream id is empty
    /// - `SessionError::SessionNotFound` - Session already gone
    pub async fn destroy_stream(&self, stream_id: &str) -> Result<TeardownReport, SessionError> {
        let session_id =
            StreamId::session_portion(stream_id).ok_or(SessionError::MissingField {
                field: "streamId",
            })?;

        self.destroy_session(&session_id, TeardownReason::ClientRequest)
            .await
            .ok_or_else(|| SessionError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Removes and tears down a session. Returns `None` if it is already gone.
    pub async fn destroy_session(
        &self,
        session_id: &SessionId,
        reason: TeardownReason,
    ) -> Option<TeardownReport> {
        let session = self.inner.registry.destroy(session_id)?;
        Some(self.teardown(session, reason).await)
    }

    /// Tears down every session.
    pub async fn shutdown(&self) -> Vec<TeardownReport> {
        let sessions = self.inner.registry.drain();
        tracing::info!(sessions = sessions.len(), "Shutting down orchestrator");

        let teardowns = sessions
            .into_iter()
            .map(|session| self.teardown(session, TeardownReason::Shutdown));
        futures::future::join_all(teardowns).await
    }
}
