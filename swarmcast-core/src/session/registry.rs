//! Concurrency-safe session table.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Session, SessionError, SessionId, SessionSnapshot};
use crate::swarm::{ContentDescriptor, MediaFileRef, SwarmHandle};

/// Maps session identifiers to live sessions.
///
/// Every mutation happens under one lock, so check-then-act sequences passed
/// to [`SessionRegistry::update`] are atomic. Closures must not block.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listed session and returns its fresh identifier.
    pub fn create(
        &self,
        descriptor: ContentDescriptor,
        engine: Arc<dyn SwarmHandle>,
        files: Vec<MediaFileRef>,
    ) -> SessionId {
        let id = SessionId::generate();
        let session = Session::new(id.clone(), descriptor, engine, files);
        self.sessions.lock().insert(id.clone(), session);
        tracing::debug!(session_id = %id, "Session registered");
        id
    }

    /// Returns a consistent snapshot of one session.
    ///
    /// # Errors
    /// - `SessionError::SessionNotFound` - No live session with this id
    pub fn get(&self, id: &SessionId) -> Result<SessionSnapshot, SessionError> {
        self.sessions
            .lock()
            .get(id)
            .map(Session::snapshot)
            .ok_or_else(|| not_found(id))
    }

    /// Runs `f` against the session under the registry lock.
    ///
    /// # Errors
    /// - `SessionError::SessionNotFound` - No live session with this id
    pub fn update<R>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, SessionError> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        Ok(f(session))
    }

    /// Removes a session so exactly one caller gets to tear it down.
    ///
    /// Returns `None` when the session is already gone.
    pub fn destroy(&self, id: &SessionId) -> Option<Session> {
        self.destroy_if(id, |_| true)
    }

    /// Removes a session only when `predicate` holds under the lock.
    pub fn destroy_if(
        &self,
        id: &SessionId,
        predicate: impl FnOnce(&Session) -> bool,
    ) -> Option<Session> {
        let mut sessions = self.sessions.lock();
        if !sessions.get(id).is_some_and(predicate) {
            return None;
        }
        let mut session = sessions.remove(id)?;
        session.mark_destroyed();
        Some(session)
    }

    /// Removes every session.
    pub fn drain(&self) -> Vec<Session> {
        let mut sessions = self.sessions.lock();
        sessions
            .drain()
            .map(|(_, mut session)| {
                session.mark_destroyed();
                session
            })
            .collect()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.lock().keys().cloned().collect()
    }
}

fn not_found(id: &SessionId) -> SessionError {
    SessionError::SessionNotFound {
        session_id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SelectionDecision, SessionState};
    use crate::test_mocks::{MockSwarmHandle, media_fixture};

    fn registry_with_session() -> (SessionRegistry, SessionId) {
        let registry = SessionRegistry::new();
        let handle = Arc::new(MockSwarmHandle::new(media_fixture()));
        let descriptor = ContentDescriptor::parse("magnet:?xt=urn:btih:abc").unwrap();
        let files = crate::swarm::media_files(&handle.files());
        let id = registry.create(descriptor, handle, files);
        (registry, id)
    }

    #[test]
    fn test_create_and_get() {
        let (registry, id) = registry_with_session();

        let snapshot = registry.get(&id).unwrap();
        assert_eq!(snapshot.id, id);
        assert_eq!(snapshot.state, SessionState::Listed);
        assert_eq!(snapshot.files.len(), 2);
        assert!(snapshot.selected_file.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_session_is_not_found() {
        let registry = SessionRegistry::new();
        let missing = SessionId::from("missing");

        assert!(matches!(
            registry.get(&missing),
            Err(SessionError::SessionNotFound { .. })
        ));
        assert!(matches!(
            registry.update(&missing, |_| ()),
            Err(SessionError::SessionNotFound { .. })
        ));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (registry, id) = registry_with_session();

        let session = registry.destroy(&id).unwrap();
        assert_eq!(session.state(), SessionState::Destroyed);
        assert!(registry.destroy(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_destroy_if_respects_predicate() {
        let (registry, id) = registry_with_session();

        registry
            .update(&id, |session| session.begin_selection(1).map(|_| ()))
            .unwrap()
            .unwrap();

        assert!(registry.destroy_if(&id, |s| !s.is_selected()).is_none());
        assert!(registry.contains(&id));
    }

    #[test]
    fn test_selection_is_decided_atomically() {
        let (registry, id) = registry_with_session();

        let first = registry.update(&id, |s| s.begin_selection(1)).unwrap();
        assert!(matches!(first, Ok(SelectionDecision::Proceed(_))));

        let same = registry.update(&id, |s| s.begin_selection(1)).unwrap();
        assert!(matches!(same, Ok(SelectionDecision::Join(_))));

        let other = registry.update(&id, |s| s.begin_selection(2)).unwrap();
        assert!(matches!(
            other,
            Err(SessionError::SelectionConflict {
                selected: 1,
                requested: 2,
                ..
            })
        ));

        assert_eq!(
            registry.get(&id).unwrap().state,
            SessionState::AwaitingReadiness
        );
    }

    #[test]
    fn test_non_media_index_is_rejected() {
        let (registry, id) = registry_with_session();

        let result = registry.update(&id, |s| s.begin_selection(0)).unwrap();
        assert!(matches!(
            result,
            Err(SessionError::FileNotFound { index: 0, .. })
        ));
        assert_eq!(registry.get(&id).unwrap().state, SessionState::Listed);
    }

    #[test]
    fn test_drain_empties_registry() {
        let (registry, _) = registry_with_session();
        let drained = registry.drain();

        assert_eq!(drained.len(), 1);
        assert!(drained.iter().all(|s| s.state() == SessionState::Destroyed));
        assert!(registry.is_empty());
    }
}
