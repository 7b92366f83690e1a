//! Session-level error taxonomy.

use serde::Serialize;

use crate::readiness::ReadinessError;
use crate::swarm::SwarmCounters;

/// Coarse classification used to pick transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    NotFound,
    Conflict,
    Acquisition,
    Readiness,
    Packaging,
}

/// Errors surfaced by orchestrator operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("Invalid content descriptor: {reason}")]
    InvalidDescriptor { reason: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("File index {index} is not a media file of session {session_id}")]
    FileNotFound { session_id: String, index: usize },

    #[error("No playable media files found in {descriptor}")]
    NoMediaFiles { descriptor: String },

    #[error(
        "Session {session_id} is already streaming file {selected}, cannot switch to {requested}"
    )]
    SelectionConflict {
        session_id: String,
        selected: usize,
        requested: usize,
    },

    #[error("Failed to acquire swarm: {reason}")]
    Acquisition { reason: String },

    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    #[error("Segment packaging failed: {reason}")]
    Packaging {
        reason: String,
        counters: Option<SwarmCounters>,
    },

    #[error("Session {session_id} was torn down")]
    TornDown { session_id: String },
}

impl SessionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SessionError::MissingField { .. } | SessionError::InvalidDescriptor { .. } => {
                ErrorClass::Validation
            }
            SessionError::SessionNotFound { .. }
            | SessionError::FileNotFound { .. }
            | SessionError::NoMediaFiles { .. }
            | SessionError::TornDown { .. } => ErrorClass::NotFound,
            SessionError::SelectionConflict { .. } => ErrorClass::Conflict,
            SessionError::Acquisition { .. } => ErrorClass::Acquisition,
            SessionError::Readiness(_) => ErrorClass::Readiness,
            SessionError::Packaging { .. } => ErrorClass::Packaging,
        }
    }

    /// Last swarm counters observed before the failure, if any.
    pub fn diagnostics(&self) -> Option<SwarmCounters> {
        match self {
            SessionError::Readiness(err) => err.counters(),
            SessionError::Packaging { counters, .. } => *counters,
            _ => None,
        }
    }

    /// Check if this error was caused by the caller's input
    pub fn is_user_error(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Validation | ErrorClass::NotFound | ErrorClass::Conflict
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            SessionError::MissingField { field: "magnetLink" }.class(),
            ErrorClass::Validation
        );
        assert_eq!(
            SessionError::NoMediaFiles {
                descriptor: "x".to_string()
            }
            .class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            SessionError::SelectionConflict {
                session_id: "s".to_string(),
                selected: 1,
                requested: 2
            }
            .class(),
            ErrorClass::Conflict
        );
        assert_eq!(
            SessionError::Readiness(ReadinessError::Cancelled).class(),
            ErrorClass::Readiness
        );
    }

    #[test]
    fn test_readiness_diagnostics_carry_counters() {
        let counters = SwarmCounters {
            peer_count: 0,
            bytes_downloaded: 0,
            download_rate: 0,
            upload_rate: 0,
        };
        let err = SessionError::from(ReadinessError::NoPeers {
            attempts: 3,
            counters,
        });

        assert_eq!(err.diagnostics(), Some(counters));
        assert!(!err.is_user_error());
        assert!(err.to_string().contains("3"));
    }
}
