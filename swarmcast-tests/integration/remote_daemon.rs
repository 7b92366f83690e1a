//! Remote swarm engine against an in-process mock daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use swarmcast_core::config::SwarmConfig;
use swarmcast_core::swarm::{
    ContentDescriptor, RemoteSwarmEngine, StreamSource, SwarmEngine, SwarmError, SwarmHandle,
    SwarmStats,
};
use swarmcast_core::{StreamOrchestrator, SwarmcastConfig};
use swarmcast_sim::SimulatedPackager;

const MAGNET: &str = "magnet:?xt=urn:btih:08ada5a7a6183aae1e09d831df6748d566095a10&dn=Sintel";
const INFO_HASH: &str = "08ada5a7a6183aae1e09d831df6748d566095a10";

#[derive(Debug)]
struct MockDaemon {
    links: Vec<String>,
    files: Vec<(&'static str, u64, &'static str)>,
    selected: Vec<bool>,
    polls_until_ready: u32,
    polls: u32,
    announces: u32,
    deleted: bool,
}

impl MockDaemon {
    fn new(polls_until_ready: u32) -> Self {
        let files = vec![
            ("Sintel.de.srt", 1_652, "Sintel/Sintel.de.srt"),
            ("Sintel.mp4", 129_241_752, "Sintel/Sintel.mp4"),
            ("poster.jpg", 46_115, "Sintel/poster.jpg"),
        ];
        Self {
            links: Vec::new(),
            selected: vec![true; files.len()],
            files,
            polls_until_ready,
            polls: 0,
            announces: 0,
            deleted: false,
        }
    }
}

type Shared = Arc<Mutex<MockDaemon>>;

async fn add_torrent(State(daemon): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let Some(link) = body["link"].as_str() else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "link required" })));
    };
    daemon.lock().links.push(link.to_string());
    (StatusCode::OK, Json(json!({ "infoHash": INFO_HASH })))
}

async fn torrent_info(State(daemon): State<Shared>) -> Result<Json<Value>, StatusCode> {
    let mut daemon = daemon.lock();
    if daemon.deleted {
        return Err(StatusCode::NOT_FOUND);
    }
    daemon.polls += 1;
    let ready = daemon.polls > daemon.polls_until_ready;
    let files: Vec<Value> = if ready {
        daemon
            .files
            .iter()
            .zip(&daemon.selected)
            .map(|((name, length, path), selected)| {
                json!({ "name": name, "length": length, "path": path, "selected": selected })
            })
            .collect()
    } else {
        Vec::new()
    };
    Ok(Json(json!({ "ready": ready, "files": files })))
}

async fn toggle_file(
    State(daemon): State<Shared>,
    Path((_hash, index, action)): Path<(String, usize, String)>,
) -> StatusCode {
    let mut daemon = daemon.lock();
    match daemon.selected.get_mut(index) {
        Some(flag) => {
            *flag = action == "select";
            StatusCode::OK
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn stats(State(daemon): State<Shared>) -> Result<Json<Value>, StatusCode> {
    let daemon = daemon.lock();
    if daemon.deleted {
        return Err(StatusCode::NOT_FOUND);
    }
    // Peers only show up once the tracker has been re-announced to
    let (downloaded, peers) = if daemon.announces > 0 {
        (65_536, 5)
    } else {
        (0, 0)
    };
    Ok(Json(json!({
        "downloaded": downloaded,
        "peers": peers,
        "downloadSpeed": downloaded * 4,
        "uploadSpeed": 1_024,
    })))
}

async fn announce(State(daemon): State<Shared>) -> StatusCode {
    daemon.lock().announces += 1;
    StatusCode::OK
}

async fn remove(State(daemon): State<Shared>) -> StatusCode {
    let mut daemon = daemon.lock();
    if daemon.deleted {
        return StatusCode::NOT_FOUND;
    }
    daemon.deleted = true;
    StatusCode::OK
}

async fn spawn_daemon(polls_until_ready: u32) -> (SocketAddr, Shared) {
    let daemon = Arc::new(Mutex::new(MockDaemon::new(polls_until_ready)));
    let app = Router::new()
        .route("/torrents", post(add_torrent))
        .route("/torrents/{hash}", get(torrent_info).delete(remove))
        .route("/torrents/{hash}/files/{index}/{action}", post(toggle_file))
        .route("/torrents/{hash}/stats", get(stats))
        .route("/torrents/{hash}/announce", post(announce))
        .with_state(daemon.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, daemon)
}

fn engine(addr: SocketAddr) -> RemoteSwarmEngine {
    RemoteSwarmEngine::new(SwarmConfig {
        daemon_url: format!("http://{addr}/"),
        request_timeout: Duration::from_secs(2),
        metadata_poll_interval: Duration::from_millis(10),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_open_waits_for_metadata() {
    let (addr, daemon) = spawn_daemon(3).await;
    let engine = engine(addr);

    let handle = engine
        .open(&ContentDescriptor::parse(MAGNET).unwrap())
        .await
        .unwrap();

    let files = handle.files();
    assert_eq!(files.len(), 3);
    assert_eq!(files[1].name, "Sintel.mp4");
    assert_eq!(files[1].index, 1);
    assert_eq!(files[1].path, "Sintel/Sintel.mp4");

    let daemon = daemon.lock();
    assert_eq!(daemon.links, vec![MAGNET.to_string()]);
    assert_eq!(daemon.polls, 4);
}

#[tokio::test]
async fn test_handle_drives_daemon() {
    let (addr, daemon) = spawn_daemon(0).await;
    let handle = engine(addr)
        .open(&ContentDescriptor::parse(MAGNET).unwrap())
        .await
        .unwrap();

    handle.select_exclusive(1).await.unwrap();
    assert_eq!(handle.selection().await.unwrap(), vec![false, true, false]);

    let idle = handle.counters().await.unwrap();
    assert_eq!(idle.peer_count, 0);
    assert!(!idle.has_data());

    handle.reannounce().await.unwrap();
    let flowing = handle.counters().await.unwrap();
    assert_eq!(flowing.peer_count, 5);
    assert_eq!(flowing.bytes_downloaded, 65_536);
    assert_eq!(flowing.upload_rate, 1_024);

    assert_eq!(
        handle.stream_source(1).await.unwrap(),
        StreamSource::Url(format!(
            "http://{addr}/torrents/{INFO_HASH}/files/1/stream"
        ))
    );
    assert!(matches!(
        handle.select_exclusive(7).await,
        Err(SwarmError::FileIndexOutOfRange { index: 7, file_count: 3 })
    ));

    handle.destroy().await.unwrap();
    handle.destroy().await.unwrap();
    assert!(daemon.lock().deleted);
    assert!(matches!(handle.counters().await, Err(SwarmError::Destroyed)));
}

#[tokio::test]
async fn test_forgotten_torrent_is_fatal() {
    let (addr, daemon) = spawn_daemon(0).await;
    let handle = engine(addr)
        .open(&ContentDescriptor::parse(MAGNET).unwrap())
        .await
        .unwrap();

    daemon.lock().deleted = true;

    let err = handle.counters().await.unwrap_err();
    assert!(matches!(err, SwarmError::EngineFailed { .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_unreachable_daemon_fails_listing() {
    // Bind and drop to get a port nothing listens on
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let engine = engine(addr);

    let result = engine.open(&ContentDescriptor::parse(MAGNET).unwrap()).await;
    assert!(matches!(result, Err(SwarmError::Http(_))));
}

#[tokio::test]
async fn test_orchestrated_stream_over_daemon() {
    let (addr, daemon) = spawn_daemon(1).await;
    let hls_dir = tempfile::tempdir().unwrap();
    let mut config = SwarmcastConfig::for_testing();
    config.packager.output_root = hls_dir.path().to_path_buf();

    let orchestrator = StreamOrchestrator::new(
        config,
        Arc::new(engine(addr)),
        Arc::new(SimulatedPackager::new(Duration::from_millis(20))),
    );

    let listing = orchestrator.list_files(MAGNET).await.unwrap();
    assert_eq!(listing.files.len(), 1);
    assert_eq!(listing.files[0].name, "Sintel.mp4");

    let ticket = orchestrator
        .select_and_stream(&listing.session_id, 1)
        .await
        .unwrap();
    assert_eq!(daemon.lock().selected, vec![false, true, false]);
    assert_eq!(daemon.lock().announces, 1);

    let report = orchestrator.status(&listing.session_id).unwrap();
    assert_eq!(report.peer_count, 5);
    assert_eq!(report.bytes_downloaded, 65_536);

    let stream_id = ticket.stream_id.to_string();
    let teardown = orchestrator.destroy_stream(&stream_id).await.unwrap();
    assert!(teardown.is_clean());
    assert!(daemon.lock().deleted);
    assert!(!hls_dir.path().join(&stream_id).exists());
}
