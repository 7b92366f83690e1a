//! JSON API handlers for the stream session lifecycle

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use swarmcast_core::orchestrator::FileListing;
use swarmcast_core::session::{SessionError, SessionId, StreamTicket};
use swarmcast_core::status::StatusReport;

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListFilesRequest {
    pub magnet_link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamRequest {
    #[serde(alias = "sessionId")]
    pub torrent_id: Option<String>,
    pub file_index: Option<usize>,
}

/// Listing response, keyed the way existing clients expect.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesResponse {
    pub torrent_id: SessionId,
    pub files: Vec<swarmcast_core::swarm::MediaFileRef>,
}

impl From<FileListing> for ListFilesResponse {
    fn from(listing: FileListing) -> Self {
        Self {
            torrent_id: listing.session_id,
            files: listing.files,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub mode: String,
    pub started_at: DateTime<Utc>,
}

/// `POST /files`
///
/// # Errors
/// - `ApiError` - Missing magnet link, discovery failure, or no media files
pub async fn list_files(
    State(state): State<AppState>,
    body: Result<Json<ListFilesRequest>, JsonRejection>,
) -> Result<Json<ListFilesResponse>, ApiError> {
    let Json(request) = body?;
    let magnet = request
        .magnet_link
        .filter(|m| !m.trim().is_empty())
        .ok_or(SessionError::MissingField {
            field: "magnetLink",
        })?;

    let listing = state.orchestrator.list_files(&magnet).await?;
    Ok(Json(listing.into()))
}

/// `POST /stream`
///
/// # Errors
/// - `ApiError` - Missing fields, unknown session or file, readiness or packaging failure
pub async fn start_stream(
    State(state): State<AppState>,
    body: Result<Json<StreamRequest>, JsonRejection>,
) -> Result<Json<StreamTicket>, ApiError> {
    let Json(request) = body?;
    let session_id = request
        .torrent_id
        .filter(|id| !id.is_empty())
        .map(SessionId::from)
        .ok_or(SessionError::MissingField { field: "torrentId" })?;
    let file_index = request
        .file_index
        .ok_or(SessionError::MissingField { field: "fileIndex" })?;

    let ticket = state
        .orchestrator
        .select_and_stream(&session_id, file_index)
        .await?;
    Ok(Json(ticket))
}

/// `GET /status/{torrentId}`
///
/// # Errors
/// - `ApiError` - Unknown session
pub async fn stream_status(
    State(state): State<AppState>,
    Path(torrent_id): Path<String>,
) -> Result<Json<StatusReport>, ApiError> {
    let report = state
        .orchestrator
        .status(&SessionId::from(torrent_id.as_str()))?;
    Ok(Json(report))
}

/// `DELETE /stream/{streamId}`
///
/// # Errors
/// - `ApiError` - Session owning the stream is already gone
pub async fn destroy_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let report = state.orchestrator.destroy_stream(&stream_id).await?;
    if !report.is_clean() {
        tracing::warn!(
            stream_id = %stream_id,
            failures = report.failures.len(),
            "Stream destroyed with teardown failures"
        );
    }

    Ok(Json(MessageResponse {
        message: format!("Stream {stream_id} stopped"),
    }))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.orchestrator.session_count(),
        mode: state.mode.to_string(),
        started_at: state.started_at,
    })
}
