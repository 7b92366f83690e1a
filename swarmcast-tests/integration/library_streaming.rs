//! Development mode backed by a local media library.

use std::sync::Arc;
use std::time::Duration;

use swarmcast_core::session::{SessionError, SessionState};
use swarmcast_core::{StreamOrchestrator, SwarmcastConfig};
use swarmcast_sim::{LibrarySwarmEngine, SimulatedPackager};
use tokio_test::assert_ok;

struct Library {
    orchestrator: StreamOrchestrator,
    magnets: Vec<String>,
    _media_dir: tempfile::TempDir,
    _hls_dir: tempfile::TempDir,
}

async fn library() -> Library {
    let media_dir = tempfile::tempdir().unwrap();
    let hls_dir = tempfile::tempdir().unwrap();

    tokio::fs::create_dir_all(media_dir.path().join("Films"))
        .await
        .unwrap();
    tokio::fs::write(media_dir.path().join("Films/Night Walk.mkv"), vec![7u8; 4096])
        .await
        .unwrap();
    tokio::fs::write(media_dir.path().join("Day Trip.mp4"), vec![3u8; 1024])
        .await
        .unwrap();
    tokio::fs::write(media_dir.path().join("cover.png"), vec![0u8; 64])
        .await
        .unwrap();

    let mut config = SwarmcastConfig::for_testing();
    config.packager.output_root = hls_dir.path().to_path_buf();

    let engine = LibrarySwarmEngine::scan(media_dir.path(), config.simulation.clone())
        .await
        .unwrap();
    let magnets = engine.movies().iter().map(|m| m.magnet_link()).collect();

    let orchestrator = StreamOrchestrator::new(
        config,
        Arc::new(engine),
        Arc::new(SimulatedPackager::new(Duration::from_millis(20))),
    );

    Library {
        orchestrator,
        magnets,
        _media_dir: media_dir,
        _hls_dir: hls_dir,
    }
}

#[tokio::test]
async fn test_library_movies_stream() {
    let library = library().await;
    assert_eq!(library.magnets.len(), 2);

    // Sorted by name, so the mkv comes second
    let listing = library
        .orchestrator
        .list_files(&library.magnets[1])
        .await
        .unwrap();
    assert_eq!(listing.files.len(), 1);
    assert_eq!(listing.files[0].name, "Night Walk.mkv");
    assert_eq!(listing.files[0].length, 4096);

    let ticket = library
        .orchestrator
        .select_and_stream(&listing.session_id, 0)
        .await
        .unwrap();
    assert_eq!(ticket.file_name, "Night Walk.mkv");

    let report = assert_ok!(library.orchestrator.status(&listing.session_id));
    assert_eq!(report.state, SessionState::Active);
    assert!(report.progress_percent > 0.0);
    assert!(report.progress_percent <= 100.0);

    assert_ok!(
        library
            .orchestrator
            .destroy_stream(&ticket.stream_id.to_string())
            .await
    );
}

#[tokio::test]
async fn test_unknown_library_magnet_fails_discovery() {
    let library = library().await;

    let err = library
        .orchestrator
        .list_files("magnet:?xt=urn:btih:ffffffffffffffffffffffffffffffffffffffff&dn=Missing")
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Acquisition { .. }));
    assert_eq!(library.orchestrator.session_count(), 0);
}
