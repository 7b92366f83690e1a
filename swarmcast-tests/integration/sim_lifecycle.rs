//! Session lifecycle against the simulated swarm and packager.

use std::sync::Arc;
use std::time::Duration;

use swarmcast_core::readiness::ReadinessError;
use swarmcast_core::session::{SessionError, SessionId, SessionState};
use swarmcast_core::{StreamOrchestrator, SwarmcastConfig};
use swarmcast_sim::{
    PackagerFault, SimulatedPackager, SimulatedSwarm, SimulatedSwarmHandle, SimulatedTorrent,
    SwarmBehavior,
};
use tokio::time::Instant;

const MAGNET: &str = "magnet:?xt=urn:btih:5a8062c076fa85e8056451c0d9aa04349ae27909&dn=Demo";

struct Harness {
    orchestrator: StreamOrchestrator,
    swarm: Arc<SimulatedSwarm>,
    packager: Arc<SimulatedPackager>,
    _hls_dir: tempfile::TempDir,
}

impl Harness {
    fn new(behavior: SwarmBehavior, packager: SimulatedPackager) -> Self {
        let hls_dir = tempfile::tempdir().unwrap();
        let mut config = SwarmcastConfig::for_testing();
        config.packager.output_root = hls_dir.path().to_path_buf();

        let torrent = SimulatedTorrent::new("Demo")
            .with_file("notes.txt", 100)
            .with_file("Demo.mkv", 50_000_000)
            .with_file("Extras/trailer.mp4", 2_000_000)
            .with_behavior(behavior);
        let swarm = Arc::new(SimulatedSwarm::new(config.simulation.clone()).with_torrent(MAGNET, torrent));
        let packager = Arc::new(packager);
        let orchestrator = StreamOrchestrator::new(config, swarm.clone(), packager.clone());

        Self {
            orchestrator,
            swarm,
            packager,
            _hls_dir: hls_dir,
        }
    }

    fn healthy() -> Self {
        Self::new(
            SwarmBehavior::Healthy,
            SimulatedPackager::new(Duration::from_millis(20)),
        )
    }

    async fn listed(&self) -> SessionId {
        self.orchestrator.list_files(MAGNET).await.unwrap().session_id
    }

    fn handle(&self) -> Arc<SimulatedSwarmHandle> {
        self.swarm.opened_handles().pop().unwrap()
    }

    fn is_gone(&self, session_id: &SessionId) -> bool {
        matches!(
            self.orchestrator.status(session_id),
            Err(SessionError::SessionNotFound { .. })
        )
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_listing_orders_media_files() {
    let harness = Harness::healthy();

    let listing = harness.orchestrator.list_files(MAGNET).await.unwrap();
    let names: Vec<_> = listing.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["Demo.mkv", "trailer.mp4"]);
    assert_eq!(listing.files[0].index, 1);
    assert_eq!(listing.files[1].path, "Demo/Extras/trailer.mp4");
}

#[tokio::test]
async fn test_swarm_recovers_after_reannounce() {
    let harness = Harness::new(
        SwarmBehavior::RecoversAfterReannounce(2),
        SimulatedPackager::new(Duration::from_millis(20)),
    );
    let session_id = harness.listed().await;

    let ticket = harness
        .orchestrator
        .select_and_stream(&session_id, 1)
        .await
        .unwrap();

    assert_eq!(ticket.file_name, "Demo.mkv");
    assert_eq!(harness.handle().reannounce_count(), 2);
    assert_eq!(harness.handle().selected_index(), Some(1));
    let report = harness.orchestrator.status(&session_id).unwrap();
    assert_eq!(report.state, SessionState::Active);
}

#[tokio::test]
async fn test_peers_without_data_times_out() {
    let harness = Harness::new(
        SwarmBehavior::PeersWithoutData,
        SimulatedPackager::new(Duration::from_millis(20)),
    );
    let session_id = harness.listed().await;

    let err = harness
        .orchestrator
        .select_and_stream(&session_id, 1)
        .await
        .unwrap_err();

    match err {
        SessionError::Readiness(ReadinessError::Timeout { counters, .. }) => {
            assert!(counters.peer_count > 0);
            assert_eq!(counters.bytes_downloaded, 0);
        }
        other => panic!("expected readiness timeout, got {other:?}"),
    }
    assert_eq!(harness.handle().reannounce_count(), 0);
    assert!(harness.handle().is_destroyed());
    assert!(harness.is_gone(&session_id));
    assert_eq!(harness.packager.start_count(), 0);
}

#[tokio::test]
async fn test_delete_while_waiting_for_data_stops_selection() {
    let harness = Harness::new(
        SwarmBehavior::PeersWithoutData,
        SimulatedPackager::new(Duration::from_millis(20)),
    );
    let session_id = harness.listed().await;

    let selection = tokio::spawn({
        let orchestrator = harness.orchestrator.clone();
        let session_id = session_id.clone();
        async move { orchestrator.select_and_stream(&session_id, 1).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let report = harness
        .orchestrator
        .destroy_stream(&format!("{session_id}_1"))
        .await
        .unwrap();
    let err = selection.await.unwrap().unwrap_err();

    assert!(report.is_clean());
    assert!(matches!(err, SessionError::TornDown { .. }));
    assert!(started.elapsed() < Duration::from_millis(300));
    assert_eq!(harness.packager.start_count(), 0);
    assert!(harness.handle().is_destroyed());
    assert_eq!(harness.orchestrator.session_count(), 0);
}

#[tokio::test]
async fn test_swarm_failure_tears_down_active_session() {
    let harness = Harness::new(
        SwarmBehavior::FailsAfter(Duration::from_millis(200)),
        SimulatedPackager::new(Duration::from_millis(20)),
    );
    let session_id = harness.listed().await;
    let ticket = harness
        .orchestrator
        .select_and_stream(&session_id, 1)
        .await
        .unwrap();
    let stream_dir = harness.orchestrator.stream_dir(&ticket.stream_id);
    assert!(stream_dir.exists());

    assert!(wait_until(|| harness.is_gone(&session_id)).await);
    assert!(wait_until(|| !stream_dir.exists()).await);
    assert!(harness.handle().is_destroyed());
    assert!(wait_until(|| harness.packager.stop_count() == 1).await);
}

#[tokio::test]
async fn test_packager_crash_tears_down_session() {
    let harness = Harness::new(
        SwarmBehavior::Healthy,
        SimulatedPackager::new(Duration::from_millis(20))
            .with_fault(PackagerFault::CrashAfterSegments(1)),
    );
    let session_id = harness.listed().await;
    let ticket = harness
        .orchestrator
        .select_and_stream(&session_id, 1)
        .await
        .unwrap();
    let stream_dir = harness.orchestrator.stream_dir(&ticket.stream_id);

    assert!(wait_until(|| harness.is_gone(&session_id)).await);
    assert!(wait_until(|| !stream_dir.exists()).await);
    assert!(harness.handle().is_destroyed());
}

#[tokio::test]
async fn test_packager_startup_failure_reports_counters() {
    let harness = Harness::new(
        SwarmBehavior::Healthy,
        SimulatedPackager::new(Duration::from_millis(20)).with_fault(PackagerFault::FailStartup),
    );
    let session_id = harness.listed().await;

    let err = harness
        .orchestrator
        .select_and_stream(&session_id, 1)
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Packaging { .. }));
    let diagnostics = err.diagnostics().unwrap();
    assert!(diagnostics.bytes_downloaded > 0);
    assert!(harness.is_gone(&session_id));
    assert!(harness.handle().is_destroyed());
}

#[tokio::test]
async fn test_finished_packaging_keeps_session_active() {
    let harness = Harness::new(
        SwarmBehavior::Healthy,
        SimulatedPackager::new(Duration::from_millis(10)).with_segment_count(2),
    );
    let session_id = harness.listed().await;
    let ticket = harness
        .orchestrator
        .select_and_stream(&session_id, 2)
        .await
        .unwrap();
    let playlist = harness
        .orchestrator
        .stream_dir(&ticket.stream_id)
        .join("playlist.m3u8");

    assert!(
        wait_until(|| std::fs::read_to_string(&playlist)
            .is_ok_and(|p| p.contains("#EXT-X-ENDLIST")))
        .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = harness.orchestrator.status(&session_id).unwrap();
    assert_eq!(report.state, SessionState::Active);
    assert_eq!(report.file_name.as_deref(), Some("trailer.mp4"));
    assert!(!harness.handle().is_destroyed());
}

#[tokio::test]
async fn test_unselected_session_expires() {
    let harness = Harness::healthy();
    let session_id = harness.listed().await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!harness.is_gone(&session_id));

    assert!(wait_until(|| harness.is_gone(&session_id)).await);
    assert!(harness.handle().is_destroyed());

    let err = harness
        .orchestrator
        .select_and_stream(&session_id, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::SessionNotFound { .. }));
}

#[tokio::test]
async fn test_selected_session_outlives_idle_window() {
    let harness = Harness::healthy();
    let session_id = harness.listed().await;
    harness
        .orchestrator
        .select_and_stream(&session_id, 1)
        .await
        .unwrap();

    // Twice the idle window
    tokio::time::sleep(Duration::from_millis(1000)).await;

    let report = harness.orchestrator.status(&session_id).unwrap();
    assert_eq!(report.state, SessionState::Active);
    assert!(report.progress_percent > 0.0);
}

#[tokio::test]
async fn test_concurrent_same_file_selection_shares_ticket() {
    let harness = Harness::healthy();
    let session_id = harness.listed().await;

    let (first, second) = futures::join!(
        harness.orchestrator.select_and_stream(&session_id, 1),
        harness.orchestrator.select_and_stream(&session_id, 1)
    );

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(harness.packager.start_count(), 1);
}

#[tokio::test]
async fn test_shutdown_releases_every_session() {
    let harness = Harness::healthy();

    let mut stream_dirs = Vec::new();
    for _ in 0..2 {
        let session_id = harness.listed().await;
        let ticket = harness
            .orchestrator
            .select_and_stream(&session_id, 1)
            .await
            .unwrap();
        stream_dirs.push(harness.orchestrator.stream_dir(&ticket.stream_id));
    }
    let _listed_only = harness.listed().await;
    assert_eq!(harness.orchestrator.session_count(), 3);

    let reports = harness.orchestrator.shutdown().await;

    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.is_clean()));
    assert_eq!(harness.orchestrator.session_count(), 0);
    assert!(harness.swarm.opened_handles().iter().all(|h| h.is_destroyed()));
    assert!(stream_dirs.iter().all(|dir| !dir.exists()));
    assert_eq!(harness.packager.stop_count(), 2);
}
