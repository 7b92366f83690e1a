//! HTTP server wiring for the Swarmcast API
//!
//! Builds the axum router around a shared [`StreamOrchestrator`] and runs it
//! until Ctrl-C, tearing down every live session on the way out.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{delete, get, post};
use chrono::{DateTime, Utc};
use swarmcast_core::{RuntimeMode, StreamOrchestrator};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::handlers::{destroy_stream, health, list_files, start_stream, stream_status};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: StreamOrchestrator,
    pub mode: RuntimeMode,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: StreamOrchestrator, mode: RuntimeMode) -> Self {
        Self {
            orchestrator,
            mode,
            started_at: Utc::now(),
        }
    }
}

/// Errors that stop the server from running
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid listen address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to prepare HLS directory {path}: {source}")]
    OutputRoot {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server terminated: {0}")]
    Serve(#[source] std::io::Error),
}

/// Builds the API router with HLS output mounted under the public prefix.
pub fn router(state: AppState) -> Router {
    let packager = &state.orchestrator.config().packager;
    let hls_files = ServeDir::new(&packager.output_root);
    let hls_prefix = packager.public_prefix.clone();

    Router::new()
        .route("/files", post(list_files))
        .route("/stream", post(start_stream))
        .route("/stream/{stream_id}", delete(destroy_stream))
        .route("/status/{torrent_id}", get(stream_status))
        .route("/health", get(health))
        .nest_service(&hls_prefix, hls_files)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the API until Ctrl-C, then shuts the orchestrator down.
///
/// # Errors
/// - `ServerError::InvalidAddress` - Host and port do not form a socket address
/// - `ServerError::OutputRoot` - HLS output directory could not be created
/// - `ServerError::Bind` - Listener could not be bound
/// - `ServerError::Serve` - Server loop failed
pub async fn run_server(
    orchestrator: StreamOrchestrator,
    mode: RuntimeMode,
) -> Result<(), ServerError> {
    let config = orchestrator.config().clone();
    let address = format!("{}:{}", config.server.host, config.server.port);
    let address: SocketAddr = address
        .parse()
        .map_err(|e: std::net::AddrParseError| ServerError::InvalidAddress {
            address: address.clone(),
            reason: e.to_string(),
        })?;

    tokio::fs::create_dir_all(&config.packager.output_root)
        .await
        .map_err(|source| ServerError::OutputRoot {
            path: config.packager.output_root.display().to_string(),
            source,
        })?;

    let app = router(AppState::new(orchestrator.clone(), mode));

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|source| ServerError::Bind { address, source })?;

    tracing::info!(
        mode = %mode,
        hls_dir = %config.packager.output_root.display(),
        "Swarmcast API listening on http://{address}"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)?;

    let reports = orchestrator.shutdown().await;
    let unclean = reports.iter().filter(|r| !r.is_clean()).count();
    tracing::info!(
        sessions = reports.len(),
        unclean,
        "Server stopped, all sessions torn down"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use swarmcast_core::SwarmcastConfig;
    use swarmcast_sim::{SimulatedPackager, SimulatedSwarm, SwarmBehavior};
    use tower::ServiceExt;

    use super::*;

    const MAGNET: &str = "magnet:?xt=urn:btih:c9e15763f722f23e98a29decdfae341b98d53056&dn=Demo";

    struct TestServer {
        app: Router,
        _hls_dir: tempfile::TempDir,
    }

    impl TestServer {
        fn new(behavior: SwarmBehavior) -> Self {
            let hls_dir = tempfile::tempdir().unwrap();
            let mut config = SwarmcastConfig::for_testing();
            config.packager.output_root = hls_dir.path().to_path_buf();

            let swarm = SimulatedSwarm::new(config.simulation.clone()).with_default_behavior(behavior);
            let packager = SimulatedPackager::new(Duration::from_millis(50));
            let orchestrator =
                StreamOrchestrator::new(config, Arc::new(swarm), Arc::new(packager));

            Self {
                app: router(AppState::new(orchestrator, RuntimeMode::Development)),
                _hls_dir: hls_dir,
            }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }

        async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
            self.send(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }

        async fn get(&self, uri: &str) -> (StatusCode, Value) {
            self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
        }

        async fn delete(&self, uri: &str) -> (StatusCode, Value) {
            self.send(
                Request::builder()
                    .method("DELETE")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
        }
    }

    #[tokio::test]
    async fn test_stream_lifecycle_over_http() {
        let server = TestServer::new(SwarmBehavior::Healthy);

        let (status, listing) = server.post("/files", json!({ "magnetLink": MAGNET })).await;
        assert_eq!(status, StatusCode::OK);
        let torrent_id = listing["torrentId"].as_str().unwrap().to_string();
        let files = listing["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["name"], "Demo.mp4");
        assert_eq!(files[1]["name"], "sample.mkv");
        let index = files[0]["index"].as_u64().unwrap();

        let (status, ticket) = server
            .post("/stream", json!({ "torrentId": torrent_id, "fileIndex": index }))
            .await;
        assert_eq!(status, StatusCode::OK);
        let stream_id = ticket["streamId"].as_str().unwrap().to_string();
        assert_eq!(stream_id, format!("{torrent_id}_{index}"));
        assert_eq!(
            ticket["playlistUrl"],
            format!("/hls/{stream_id}/playlist.m3u8")
        );
        assert_eq!(ticket["fileName"], "Demo.mp4");

        let (status, report) = server.get(&format!("/status/{torrent_id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["state"], "active");
        assert!(report["bytesDownloaded"].as_u64().unwrap() > 0);
        assert!(report["peerCount"].as_u64().unwrap() > 0);

        let response = server
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/hls/{stream_id}/playlist.m3u8"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (status, body) = server.delete(&format!("/stream/{stream_id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().contains(&stream_id));

        let (status, _) = server.delete(&format!("/stream/{stream_id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = server.get(&format!("/status/{torrent_id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_fields_are_bad_requests() {
        let server = TestServer::new(SwarmBehavior::Healthy);

        let (status, body) = server.post("/files", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "magnetLink is required");

        let (status, _) = server.post("/files", json!({ "magnetLink": "   " })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = server.post("/stream", json!({ "torrentId": "abc" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "fileIndex is required");

        let (status, _) = server
            .send(
                Request::builder()
                    .method("POST")
                    .uri("/files")
                    .header("content-type", "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_session_id_alias_and_unknown_session() {
        let server = TestServer::new(SwarmBehavior::Healthy);

        let (status, body) = server
            .post("/stream", json!({ "sessionId": "missing", "fileIndex": 0 }))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("missing"));

        let (status, _) = server.get("/status/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_selection_conflict_is_409() {
        let server = TestServer::new(SwarmBehavior::Healthy);

        let (_, listing) = server.post("/files", json!({ "magnetLink": MAGNET })).await;
        let torrent_id = listing["torrentId"].as_str().unwrap().to_string();
        let files = listing["files"].as_array().unwrap();
        let first = files[0]["index"].as_u64().unwrap();
        let second = files[1]["index"].as_u64().unwrap();

        let (status, _) = server
            .post("/stream", json!({ "torrentId": torrent_id, "fileIndex": first }))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = server
            .post("/stream", json!({ "torrentId": torrent_id, "fileIndex": second }))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_readiness_failure_reports_diagnostics() {
        let server = TestServer::new(SwarmBehavior::NoPeers);

        let (_, listing) = server.post("/files", json!({ "magnetLink": MAGNET })).await;
        let torrent_id = listing["torrentId"].as_str().unwrap().to_string();

        let (status, body) = server
            .post("/stream", json!({ "torrentId": torrent_id, "fileIndex": 0 }))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("No peers"));
        assert_eq!(body["diagnostics"]["peerCount"], 0);

        let (status, _) = server.get(&format!("/status/{torrent_id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_counts_sessions() {
        let server = TestServer::new(SwarmBehavior::Healthy);

        let (status, body) = server.get("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 0);
        assert_eq!(body["mode"], "DEVELOPMENT");

        server.post("/files", json!({ "magnetLink": MAGNET })).await;
        let (_, body) = server.get("/health").await;
        assert_eq!(body["sessions"], 1);
    }
}
