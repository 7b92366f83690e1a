//! Mapping of session errors onto HTTP responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use swarmcast_core::session::{ErrorClass, SessionError};
use swarmcast_core::swarm::SwarmCounters;

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<SwarmCounters>,
}

/// API-level error carrying the status code it renders with.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Malformed request body: {0}")]
    MalformedBody(#[from] JsonRejection),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Session(err) => status_for(err.class()),
            ApiError::MalformedBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// True when the caller's request caused the failure.
    pub fn is_user_error(&self) -> bool {
        match self {
            ApiError::Session(err) => err.is_user_error(),
            ApiError::MalformedBody(_) => true,
        }
    }
}

fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Validation => StatusCode::BAD_REQUEST,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Conflict => StatusCode::CONFLICT,
        ErrorClass::Acquisition | ErrorClass::Readiness | ErrorClass::Packaging => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let diagnostics = match &self {
            ApiError::Session(err) => err.diagnostics(),
            ApiError::MalformedBody(_) => None,
        };

        if self.is_user_error() {
            tracing::debug!(status = status.as_u16(), "Request rejected: {}", self);
        } else {
            tracing::error!(status = status.as_u16(), "Request failed: {}", self);
        }

        let body = ErrorBody {
            error: self.to_string(),
            diagnostics,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use swarmcast_core::readiness::ReadinessError;

    use super::*;

    #[test]
    fn test_status_codes_follow_error_class() {
        let cases = [
            (
                SessionError::MissingField { field: "magnetLink" },
                StatusCode::BAD_REQUEST,
            ),
            (
                SessionError::SessionNotFound {
                    session_id: "abc".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                SessionError::SelectionConflict {
                    session_id: "abc".to_string(),
                    selected: 0,
                    requested: 1,
                },
                StatusCode::CONFLICT,
            ),
            (
                SessionError::Acquisition {
                    reason: "daemon unreachable".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                SessionError::Readiness(ReadinessError::Cancelled),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let err = ApiError::from(err);
            assert_eq!(err.status_code(), expected);
            assert_eq!(err.is_user_error(), expected.is_client_error());
        }
    }

    #[tokio::test]
    async fn test_diagnostics_are_rendered() {
        let counters = SwarmCounters {
            bytes_downloaded: 0,
            peer_count: 0,
            download_rate: 0,
            upload_rate: 0,
        };
        let err = ApiError::from(SessionError::Readiness(ReadinessError::NoPeers {
            attempts: 3,
            counters,
        }));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json["error"].as_str().unwrap().contains("3"));
        assert_eq!(json["diagnostics"]["peerCount"], 0);
        assert_eq!(json["diagnostics"]["bytesDownloaded"], 0);
    }
}
