//! Simulated segment packager.
//!
//! Writes a syntactically valid HLS playlist and small placeholder segments
//! on a timer, so playback URLs resolve without FFmpeg installed.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use swarmcast_core::packager::{
    PackagerProgress, PackagingError, PackagingJob, PackagingProcess, SegmentPackager,
    SharedProgress,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Failure to inject into simulated packaging runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackagerFault {
    #[default]
    None,
    /// Every start fails as if FFmpeg rejected the input
    FailStartup,
    /// Process exits with an error after writing this many segments
    CrashAfterSegments(u32),
}

/// Packager that fakes FFmpeg's HLS output.
pub struct SimulatedPackager {
    segment_interval: Duration,
    segment_count: Option<u32>,
    fault: PackagerFault,
    starts: Arc<AtomicU32>,
    stops: Arc<AtomicU32>,
}

impl SimulatedPackager {
    /// Writes one segment every `segment_interval` until stopped.
    pub fn new(segment_interval: Duration) -> Self {
        Self {
            segment_interval,
            segment_count: None,
            fault: PackagerFault::None,
            starts: Arc::new(AtomicU32::new(0)),
            stops: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Exit cleanly after `count` segments, like FFmpeg reaching end of input.
    pub fn with_segment_count(mut self, count: u32) -> Self {
        self.segment_count = Some(count);
        self
    }

    pub fn with_fault(mut self, fault: PackagerFault) -> Self {
        self.fault = fault;
        self
    }

    pub fn start_count(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SegmentPackager for SimulatedPackager {
    async fn start(&self, job: PackagingJob) -> Result<Box<dyn PackagingProcess>, PackagingError> {
        if self.fault == PackagerFault::FailStartup {
            return Err(PackagingError::ExitedDuringStartup {
                status: "exit code 1".to_string(),
                stderr_tail: format!("{}: Invalid data found when processing input", job.source),
            });
        }

        write_playlist(&job.playlist_path, 0, false)
            .await
            .map_err(|e| PackagingError::Io {
                operation: "write initial playlist".to_string(),
                source: e,
            })?;

        self.starts.fetch_add(1, Ordering::SeqCst);
        tracing::info!(stream_id = %job.stream_id, "Simulated packager started");

        let progress: SharedProgress = Arc::new(Mutex::new(PackagerProgress::default()));
        let (exit_tx, exit_rx) = oneshot::channel();
        let worker = tokio::spawn(write_segments(
            job,
            self.segment_interval,
            self.segment_count,
            self.fault,
            Arc::clone(&progress),
            exit_tx,
        ));

        Ok(Box::new(SimulatedProcess {
            worker,
            exit: Some(exit_rx),
            progress,
            stops: Arc::clone(&self.stops),
        }))
    }

    fn is_available(&self) -> bool {
        true
    }
}

async fn write_segments(
    job: PackagingJob,
    interval: Duration,
    limit: Option<u32>,
    fault: PackagerFault,
    progress: SharedProgress,
    exit: oneshot::Sender<Result<(), PackagingError>>,
) {
    let mut written = 0u32;
    let outcome = loop {
        tokio::time::sleep(interval).await;

        if let PackagerFault::CrashAfterSegments(n) = fault
            && written >= n
        {
            break Err(PackagingError::Crashed {
                status: "exit code 1".to_string(),
                stderr_tail: "simulated crash".to_string(),
            });
        }

        let segment = job.output_dir.join(format!("segment_{written:05}.ts"));
        let finished = limit.is_some_and(|limit| written + 1 >= limit);
        let result = async {
            tokio::fs::write(&segment, [0x47u8; 188]).await?;
            write_playlist(&job.playlist_path, written + 1, finished).await
        }
        .await;

        if let Err(e) = result {
            break Err(PackagingError::Io {
                operation: format!("write {}", segment.display()),
                source: e,
            });
        }

        written += 1;
        {
            let mut progress = progress.lock();
            progress.frame = Some(u64::from(written) * 240);
            progress.time_position = Some(Duration::from_secs(u64::from(written) * 10));
            progress.updates += 1;
        }
        tracing::trace!(stream_id = %job.stream_id, segment = written, "Simulated segment written");

        if finished {
            break Ok(());
        }
    };

    let _ = exit.send(outcome);
}

/// Rewrites the playlist listing `segments` ten-second segments.
async fn write_playlist(path: &Path, segments: u32, finished: bool) -> std::io::Result<()> {
    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n");
    for i in 0..segments {
        playlist.push_str(&format!("#EXTINF:10.000000,\nsegment_{i:05}.ts\n"));
    }
    if finished {
        playlist.push_str("#EXT-X-ENDLIST\n");
    }
    tokio::fs::write(path, playlist).await
}

struct SimulatedProcess {
    worker: JoinHandle<()>,
    exit: Option<oneshot::Receiver<Result<(), PackagingError>>>,
    progress: SharedProgress,
    stops: Arc<AtomicU32>,
}

#[async_trait]
impl PackagingProcess for SimulatedProcess {
    async fn wait(&mut self) -> Result<(), PackagingError> {
        let Some(exit) = self.exit.as_mut() else {
            return Ok(());
        };
        let outcome = match exit.await {
            Ok(outcome) => outcome,
            // Worker aborted by stop
            Err(_) => Ok(()),
        };
        self.exit = None;
        outcome
    }

    async fn stop(&mut self) -> Result<(), PackagingError> {
        self.worker.abort();
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn progress(&self) -> Option<SharedProgress> {
        Some(Arc::clone(&self.progress))
    }
}

impl Drop for SimulatedProcess {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use swarmcast_core::swarm::StreamSource;

    use super::*;

    fn job(dir: &Path) -> PackagingJob {
        PackagingJob {
            stream_id: "s_0".to_string(),
            source: StreamSource::Url("sim://x/files/0".to_string()),
            output_dir: dir.to_path_buf(),
            playlist_path: dir.join("playlist.m3u8"),
        }
    }

    #[tokio::test]
    async fn test_writes_playlist_and_segments() {
        let dir = tempfile::tempdir().unwrap();
        let packager = SimulatedPackager::new(Duration::from_millis(5)).with_segment_count(3);

        let mut process = packager.start(job(dir.path())).await.unwrap();
        process.wait().await.unwrap();

        let playlist = tokio::fs::read_to_string(dir.path().join("playlist.m3u8"))
            .await
            .unwrap();
        assert!(playlist.starts_with("#EXTM3U"));
        assert_eq!(playlist.matches("#EXTINF").count(), 3);
        assert!(playlist.ends_with("#EXT-X-ENDLIST\n"));
        assert!(dir.path().join("segment_00002.ts").exists());

        let progress = process.progress().unwrap().lock().clone();
        assert_eq!(progress.packaged_seconds(), Some(30.0));
        assert_eq!(packager.start_count(), 1);
    }

    #[tokio::test]
    async fn test_startup_fault() {
        let dir = tempfile::tempdir().unwrap();
        let packager = SimulatedPackager::new(Duration::from_millis(5))
            .with_fault(PackagerFault::FailStartup);

        let result = packager.start(job(dir.path())).await;
        assert!(matches!(result, Err(PackagingError::ExitedDuringStartup { .. })));
        assert!(!dir.path().join("playlist.m3u8").exists());
    }

    #[tokio::test]
    async fn test_crash_fault_surfaces_from_wait() {
        let dir = tempfile::tempdir().unwrap();
        let packager = SimulatedPackager::new(Duration::from_millis(5))
            .with_fault(PackagerFault::CrashAfterSegments(1));

        let mut process = packager.start(job(dir.path())).await.unwrap();
        assert!(matches!(
            process.wait().await,
            Err(PackagingError::Crashed { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_ends_wait() {
        let dir = tempfile::tempdir().unwrap();
        let packager = SimulatedPackager::new(Duration::from_millis(5));

        let mut process = packager.start(job(dir.path())).await.unwrap();
        process.stop().await.unwrap();
        process.wait().await.unwrap();
        assert_eq!(packager.stop_count(), 1);
    }
}
