//! Magnet link to HLS playlist and back, through the HTTP API.
//!
//! Runs on the real clock: the simulated swarm trickles 50 bytes per second
//! and the readiness gate polls once per second, so activation takes one
//! poll interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use swarmcast_core::{RuntimeMode, StreamOrchestrator, SwarmcastConfig};
use swarmcast_sim::{SimulatedPackager, SimulatedSwarm, SimulatedTorrent};
use swarmcast_web::{AppState, router};
use tower::ServiceExt;

const DESCRIPTOR: &str = "magnet:?xt=urn:btih:dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c&dn=D";
const DOCUMENTS: &str = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&dn=Docs";

struct Workflow {
    app: Router,
    hls_dir: tempfile::TempDir,
}

impl Workflow {
    fn new() -> Self {
        let hls_dir = tempfile::tempdir().unwrap();

        let mut config = SwarmcastConfig::for_testing();
        config.packager.output_root = hls_dir.path().to_path_buf();
        config.session.idle_timeout = Duration::from_secs(30);
        config.readiness.poll_interval = Duration::from_secs(1);
        config.readiness.overall_timeout = Duration::from_secs(10);
        config.metrics.sample_interval = Duration::from_millis(250);
        config.simulation.simulated_download_speed = 50;
        config.simulation.simulated_peers = 4;

        let torrent = SimulatedTorrent::new("D")
            .with_file("a.txt", 100)
            .with_file("movie.mp4", 5_000_000)
            .with_file("sample.mp4", 1_000);
        let documents = SimulatedTorrent::new("Docs")
            .with_file("manual.pdf", 2_048_000)
            .with_file("README.txt", 512);
        let swarm = SimulatedSwarm::new(config.simulation.clone())
            .with_torrent(DESCRIPTOR, torrent)
            .with_torrent(DOCUMENTS, documents);
        let orchestrator = StreamOrchestrator::new(
            config,
            Arc::new(swarm),
            Arc::new(SimulatedPackager::new(Duration::from_millis(100))),
        );

        Self {
            app: router(AppState::new(orchestrator, RuntimeMode::Development)),
            hls_dir,
        }
    }

    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}

#[tokio::test]
async fn test_magnet_to_playlist_and_teardown() {
    let workflow = Workflow::new();

    // List: only the two mp4 files, largest first
    let (status, listing) = workflow
        .call("POST", "/files", Some(json!({ "magnetLink": DESCRIPTOR })))
        .await;
    assert_eq!(status, StatusCode::OK);
    let torrent_id = listing["torrentId"].as_str().unwrap().to_string();
    let files = listing["files"].as_array().unwrap();
    let names: Vec<_> = files.iter().map(|f| f["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["movie.mp4", "sample.mp4"]);
    assert_eq!(files[0]["length"], 5_000_000);
    assert_eq!(files[0]["index"], 1);

    // Select movie.mp4 and wait for the swarm to deliver its first bytes
    let started = Instant::now();
    let (status, ticket) = workflow
        .call(
            "POST",
            "/stream",
            Some(json!({ "torrentId": torrent_id, "fileIndex": 1 })),
        )
        .await;
    let activation = started.elapsed();
    assert_eq!(status, StatusCode::OK);
    assert!(activation >= Duration::from_millis(900), "{activation:?}");
    assert!(activation < Duration::from_millis(2500), "{activation:?}");

    let stream_id = ticket["streamId"].as_str().unwrap().to_string();
    assert_eq!(stream_id, format!("{torrent_id}_1"));
    assert_eq!(ticket["fileName"], "movie.mp4");
    assert_eq!(
        ticket["playlistUrl"],
        format!("/hls/{stream_id}/playlist.m3u8")
    );

    let stream_dir = workflow.hls_dir.path().join(&stream_id);
    assert!(stream_dir.join("playlist.m3u8").exists());

    // Status mirrors the simulated counters
    let (status, report) = workflow.call("GET", &format!("/status/{torrent_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["state"], "active");
    assert_eq!(report["peerCount"], 4);
    let downloaded = report["bytesDownloaded"].as_u64().unwrap();
    assert!(downloaded >= 50, "{downloaded}");
    let expected = downloaded as f64 / 5_000_000.0 * 100.0;
    let progress = report["progressPercent"].as_f64().unwrap();
    assert!((progress - expected).abs() < 1e-9, "{progress} vs {expected}");

    // Segments appear while the stream is live
    tokio::time::sleep(Duration::from_millis(350)).await;
    let (status, _) = workflow
        .call("GET", &format!("/hls/{stream_id}/segment_00000.ts"), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    // Destroy removes everything, twice is harmless
    let (status, _) = workflow
        .call("DELETE", &format!("/stream/{stream_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!stream_dir.exists());

    let (status, body) = workflow
        .call("DELETE", &format!("/stream/{stream_id}"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = workflow.call("GET", &format!("/status/{torrent_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_descriptor_without_media_leaves_no_session() {
    let workflow = Workflow::new();

    let (status, body) = workflow
        .call("POST", "/files", Some(json!({ "magnetLink": DOCUMENTS })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("No playable media"));

    let (status, body) = workflow.call("POST", "/files", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "magnetLink is required");

    let (_, health) = workflow.call("GET", "/health", None).await;
    assert_eq!(health["sessions"], 0);
}
