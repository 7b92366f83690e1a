//! Stream sessions and their lifecycle state.
//!
//! A session binds one swarm handle to at most one selected media file and at
//! most one running packager. Sessions live in the [`SessionRegistry`] and are
//! only ever mutated under its lock.

pub mod error;
pub mod registry;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use error::{ErrorClass, SessionError};
pub use registry::SessionRegistry;

use crate::packager::{PackagerProgress, SharedProgress};
use crate::swarm::{ContentDescriptor, MediaFileRef, SwarmCounters, SwarmHandle};

/// Opaque unique session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh identifier. Never contains `_`.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for SessionId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stream identifier of the form `{session_id}_{file_index}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId {
    session_id: SessionId,
    file_index: usize,
}

impl StreamId {
    pub fn new(session_id: SessionId, file_index: usize) -> Self {
        Self {
            session_id,
            file_index,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn file_index(&self) -> usize {
        self.file_index
    }

    /// Extracts the session portion of a raw stream identifier.
    ///
    /// Only the part before the first `_` matters, so identifiers with a
    /// malformed index still resolve to their session.
    pub fn session_portion(raw: &str) -> Option<SessionId> {
        let session = raw.split_once('_').map_or(raw, |(session, _)| session);
        (!session.is_empty()).then(|| SessionId::from(session))
    }
}

impl FromStr for StreamId {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (session, index) = raw
            .split_once('_')
            .ok_or_else(|| format!("Invalid stream id: '{raw}'"))?;
        if session.is_empty() {
            return Err(format!("Invalid stream id: '{raw}'"));
        }
        let file_index = index
            .parse()
            .map_err(|_| format!("Invalid file index in stream id: '{raw}'"))?;
        Ok(Self::new(SessionId::from(session), file_index))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.session_id, self.file_index)
    }
}

impl Serialize for StreamId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Swarm handle exists, file table not yet known
    Discovering,
    /// Media files listed, waiting for a selection
    Listed,
    /// File selected, waiting for the swarm to deliver data
    AwaitingReadiness,
    /// Packager running
    Active,
    /// Torn down
    Destroyed,
}

impl SessionState {
    /// Check if the lifecycle permits moving to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Discovering, Listed)
                | (Listed, AwaitingReadiness)
                | (AwaitingReadiness, Active)
                | (Discovering | Listed | AwaitingReadiness | Active, Destroyed)
        )
    }

    /// Check if the session still accepts a first selection
    pub fn can_select(self) -> bool {
        matches!(self, SessionState::Listed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Destroyed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Discovering => "discovering",
            SessionState::Listed => "listed",
            SessionState::AwaitingReadiness => "awaiting_readiness",
            SessionState::Active => "active",
            SessionState::Destroyed => "destroyed",
        };
        write!(f, "{name}")
    }
}

/// Most recent swarm counter sample for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    #[serde(flatten)]
    pub counters: SwarmCounters,
    pub sampled_at: Option<DateTime<Utc>>,
}

/// Handed to callers once a session becomes active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamTicket {
    pub stream_id: StreamId,
    pub playlist_url: String,
    pub file_name: String,
}

/// Running packager supervision task.
pub(crate) struct PackagerTask {
    pub(crate) stop: CancellationToken,
    pub(crate) handle: JoinHandle<()>,
}

/// Outcome of a selection request, decided atomically under the registry lock.
pub(crate) enum SelectionDecision {
    /// Caller owns the selection and must drive it to Active
    Proceed(SelectionGrant),
    /// Same file already selected, wait for its ticket
    Join(watch::Receiver<Option<StreamTicket>>),
}

pub(crate) struct SelectionGrant {
    pub(crate) engine: Arc<dyn SwarmHandle>,
    pub(crate) file: MediaFileRef,
    pub(crate) cancel: CancellationToken,
}

/// One stream session.
pub struct Session {
    id: SessionId,
    descriptor: ContentDescriptor,
    engine: Arc<dyn SwarmHandle>,
    state: SessionState,
    files: Vec<MediaFileRef>,
    selected_file: Option<MediaFileRef>,
    metrics: MetricsSnapshot,
    created_at: DateTime<Utc>,
    ticket: Option<StreamTicket>,
    pub(crate) stream_dir: Option<PathBuf>,
    pub(crate) packager_task: Option<PackagerTask>,
    progress: Option<SharedProgress>,
    cancel: CancellationToken,
    idle_timer: CancellationToken,
    activation: watch::Sender<Option<StreamTicket>>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        descriptor: ContentDescriptor,
        engine: Arc<dyn SwarmHandle>,
        files: Vec<MediaFileRef>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let idle_timer = cancel.child_token();
        let (activation, _) = watch::channel(None);

        tracing::debug!(
            session_id = %id,
            "Session state {} -> {}",
            SessionState::Discovering,
            SessionState::Listed
        );

        Self {
            id,
            descriptor,
            engine,
            state: SessionState::Listed,
            files,
            selected_file: None,
            metrics: MetricsSnapshot::default(),
            created_at: Utc::now(),
            ticket: None,
            stream_dir: None,
            packager_task: None,
            progress: None,
            cancel,
            idle_timer,
            activation,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn files(&self) -> &[MediaFileRef] {
        &self.files
    }

    pub fn selected_file(&self) -> Option<&MediaFileRef> {
        self.selected_file.as_ref()
    }

    /// Check if a file has been bound to this session
    pub fn is_selected(&self) -> bool {
        self.selected_file.is_some()
    }

    pub fn engine(&self) -> &Arc<dyn SwarmHandle> {
        &self.engine
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn idle_timer(&self) -> &CancellationToken {
        &self.idle_timer
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(session_id = %self.id, "Session state {} -> {}", self.state, next);
        self.state = next;
    }

    /// Binds `index` to this session or decides how a repeated request is served.
    ///
    /// # Errors
    /// - `SessionError::FileNotFound` - Index is not one of the listed media files
    /// - `SessionError::SelectionConflict` - A different file is already selected
    /// - `SessionError::TornDown` - Session is being destroyed
    pub(crate) fn begin_selection(
        &mut self,
        index: usize,
    ) -> Result<SelectionDecision, SessionError> {
        if let Some(selected) = &self.selected_file {
            if selected.index != index {
                return Err(SessionError::SelectionConflict {
                    session_id: self.id.to_string(),
                    selected: selected.index,
                    requested: index,
                });
            }
            return Ok(SelectionDecision::Join(self.activation.subscribe()));
        }

        if !self.state.can_select() {
            return Err(SessionError::TornDown {
                session_id: self.id.to_string(),
            });
        }

        let file = self
            .files
            .iter()
            .find(|file| file.index == index)
            .cloned()
            .ok_or_else(|| SessionError::FileNotFound {
                session_id: self.id.to_string(),
                index,
            })?;

        self.idle_timer.cancel();
        self.selected_file = Some(file.clone());
        self.transition(SessionState::AwaitingReadiness);

        Ok(SelectionDecision::Proceed(SelectionGrant {
            engine: Arc::clone(&self.engine),
            file,
            cancel: self.cancel.clone(),
        }))
    }

    pub(crate) fn record_sample(&mut self, counters: SwarmCounters) {
        self.metrics = MetricsSnapshot {
            counters,
            sampled_at: Some(Utc::now()),
        };
    }

    /// Moves to Active and publishes the ticket to any joined callers.
    pub(crate) fn activate(
        &mut self,
        ticket: StreamTicket,
        task: PackagerTask,
        progress: Option<SharedProgress>,
    ) {
        self.packager_task = Some(task);
        self.progress = progress;
        self.ticket = Some(ticket.clone());
        self.transition(SessionState::Active);
        self.activation.send_replace(Some(ticket));
    }

    pub(crate) fn mark_destroyed(&mut self) {
        if self.state != SessionState::Destroyed {
            self.transition(SessionState::Destroyed);
        }
    }

    /// Copies out the caller-visible parts of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            descriptor: self.descriptor.clone(),
            state: self.state,
            files: self.files.clone(),
            selected_file: self.selected_file.clone(),
            metrics: self.metrics,
            created_at: self.created_at,
            ticket: self.ticket.clone(),
            packager_progress: self.progress.as_ref().map(|p| p.lock().clone()),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("selected_file", &self.selected_file.as_ref().map(|f| f.index))
            .field("stream_dir", &self.stream_dir)
            .finish_non_exhaustive()
    }
}

/// Read-only copy of a session taken under the registry lock.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub descriptor: ContentDescriptor,
    pub state: SessionState,
    pub files: Vec<MediaFileRef>,
    pub selected_file: Option<MediaFileRef>,
    pub metrics: MetricsSnapshot,
    pub created_at: DateTime<Utc>,
    pub ticket: Option<StreamTicket>,
    pub packager_progress: Option<PackagerProgress>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique_and_underscore_free() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(!a.as_str().contains('_'));
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_stream_id_format_and_parse() {
        let session = SessionId::from("abc123");
        let stream = StreamId::new(session.clone(), 4);
        assert_eq!(stream.to_string(), "abc123_4");

        let parsed: StreamId = "abc123_4".parse().unwrap();
        assert_eq!(parsed, stream);
        assert!("abc123".parse::<StreamId>().is_err());
        assert!("_4".parse::<StreamId>().is_err());
        assert!("abc123_x".parse::<StreamId>().is_err());
    }

    #[test]
    fn test_session_portion_tolerates_bad_index() {
        assert_eq!(
            StreamId::session_portion("abc_9"),
            Some(SessionId::from("abc"))
        );
        assert_eq!(
            StreamId::session_portion("abc_not-a-number"),
            Some(SessionId::from("abc"))
        );
        assert_eq!(StreamId::session_portion("abc"), Some(SessionId::from("abc")));
        assert_eq!(StreamId::session_portion("_1"), None);
        assert_eq!(StreamId::session_portion(""), None);
    }

    #[test]
    fn test_state_transitions() {
        use SessionState::*;

        assert!(Discovering.can_transition_to(Listed));
        assert!(Listed.can_transition_to(AwaitingReadiness));
        assert!(AwaitingReadiness.can_transition_to(Active));
        assert!(Active.can_transition_to(Destroyed));
        assert!(Listed.can_transition_to(Destroyed));

        assert!(!Listed.can_transition_to(Active));
        assert!(!Active.can_transition_to(Listed));
        assert!(!Destroyed.can_transition_to(Listed));
        assert!(!Destroyed.can_transition_to(Destroyed));

        assert!(Listed.can_select());
        assert!(!Active.can_select());
        assert!(Destroyed.is_terminal());
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&SessionState::AwaitingReadiness).unwrap(),
            "\"awaiting_readiness\""
        );
        assert_eq!(SessionState::Active.to_string(), "active");
    }
}
