//! FFmpeg HLS packager driven through the `ffmpeg` CLI.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use super::{
    PackagerProgress, PackagingError, PackagingJob, PackagingProcess, SegmentPackager,
    SharedProgress,
};
use crate::config::PackagerConfig;

const STDERR_TAIL_LINES: usize = 20;

type StderrTail = Arc<Mutex<VecDeque<String>>>;

/// Production packager that remuxes into HLS without re-encoding.
pub struct FfmpegHlsPackager {
    config: PackagerConfig,
}

impl FfmpegHlsPackager {
    pub fn new(config: PackagerConfig) -> Self {
        Self { config }
    }

    /// Builds the FFmpeg invocation for a job.
    pub fn build_command(&self, job: &PackagingJob) -> Command {
        let mut cmd = Command::new(&self.config.ffmpeg_path);
        cmd.arg("-hide_banner")
            .arg("-y")
            .arg("-i")
            .arg(job.source.as_input())
            .arg("-c:v")
            .arg("copy")
            .arg("-c:a")
            .arg("copy")
            .arg("-hls_time")
            .arg(self.config.segment_duration.as_secs().max(1).to_string())
            .arg("-hls_list_size")
            .arg(self.config.playlist_size.to_string());

        if self.config.delete_old_segments {
            cmd.arg("-hls_flags").arg("delete_segments");
        }

        cmd.arg("-hls_segment_filename")
            .arg(job.output_dir.join("segment_%05d.ts"))
            .arg("-f")
            .arg("hls")
            .arg(&job.playlist_path);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SegmentPackager for FfmpegHlsPackager {
    async fn start(&self, job: PackagingJob) -> Result<Box<dyn PackagingProcess>, PackagingError> {
        tracing::info!(
            stream_id = %job.stream_id,
            source = %job.source,
            output = %job.playlist_path.display(),
            "Starting FFmpeg HLS packager"
        );

        let mut cmd = self.build_command(&job);
        tracing::debug!("Executing FFmpeg command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            tracing::error!("Failed to execute FFmpeg: {}", e);
            PackagingError::SpawnFailed {
                reason: format!("{}: {e}", self.config.ffmpeg_path.display()),
            }
        })?;

        let tail: StderrTail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let progress: SharedProgress = Arc::new(Mutex::new(PackagerProgress::default()));

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(
                stderr,
                job.stream_id.clone(),
                Arc::clone(&tail),
                Arc::clone(&progress),
            ));
        }

        // Startup is acknowledged once the process survives the grace window
        match tokio::time::timeout(self.config.startup_grace, child.wait()).await {
            Ok(Ok(status)) => {
                let stderr_tail = wait_for_tail(&tail).await;
                tracing::error!(
                    stream_id = %job.stream_id,
                    %status,
                    "FFmpeg exited during startup: {}",
                    stderr_tail
                );
                Err(PackagingError::ExitedDuringStartup {
                    status: describe_status(status),
                    stderr_tail,
                })
            }
            Ok(Err(e)) => Err(PackagingError::Io {
                operation: "wait for ffmpeg startup".to_string(),
                source: e,
            }),
            Err(_) => {
                tracing::debug!(stream_id = %job.stream_id, "FFmpeg startup acknowledged");
                Ok(Box::new(FfmpegProcess {
                    child,
                    stream_id: job.stream_id,
                    tail,
                    progress,
                }))
            }
        }
    }

    fn is_available(&self) -> bool {
        std::process::Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

struct FfmpegProcess {
    child: Child,
    stream_id: String,
    tail: StderrTail,
    progress: SharedProgress,
}

#[async_trait]
impl PackagingProcess for FfmpegProcess {
    async fn wait(&mut self) -> Result<(), PackagingError> {
        let status = self.child.wait().await.map_err(|e| PackagingError::Io {
            operation: "wait for ffmpeg".to_string(),
            source: e,
        })?;

        if status.success() {
            tracing::info!(stream_id = %self.stream_id, "FFmpeg finished packaging");
            return Ok(());
        }

        let stderr_tail = wait_for_tail(&self.tail).await;
        Err(PackagingError::Crashed {
            status: describe_status(status),
            stderr_tail,
        })
    }

    async fn stop(&mut self) -> Result<(), PackagingError> {
        match self.child.try_wait() {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => {}
            Err(e) => {
                return Err(PackagingError::StopFailed {
                    reason: e.to_string(),
                });
            }
        }

        self.child
            .kill()
            .await
            .map_err(|e| PackagingError::StopFailed {
                reason: e.to_string(),
            })?;
        tracing::debug!(stream_id = %self.stream_id, "FFmpeg terminated");
        Ok(())
    }

    fn progress(&self) -> Option<SharedProgress> {
        Some(Arc::clone(&self.progress))
    }
}

async fn drain_stderr(
    stderr: ChildStderr,
    stream_id: String,
    tail: StderrTail,
    progress: SharedProgress,
) {
    // FFmpeg terminates progress lines with '\r', so split on both
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(stream_id = %stream_id, "FFmpeg stderr closed: {}", e);
                break;
            }
        }

        let text = String::from_utf8_lossy(&buf);
        for line in text.split('\r').map(str::trim).filter(|l| !l.is_empty()) {
            if progress.lock().update_from_ffmpeg_line(line) {
                tracing::trace!(stream_id = %stream_id, "ffmpeg: {}", line);
            } else {
                tracing::debug!(stream_id = %stream_id, "ffmpeg: {}", line);
            }

            let mut tail = tail.lock();
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        }
    }
}

/// Joins the captured stderr lines after giving the drain task a moment to
/// catch up with a process that just exited.
async fn wait_for_tail(tail: &StderrTail) -> String {
    tokio::task::yield_now().await;
    let lines = tail.lock();
    if lines.is_empty() {
        return "no output".to_string();
    }
    lines.iter().cloned().collect::<Vec<_>>().join(" | ")
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "signal termination".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::swarm::StreamSource;

    fn job(dir: &std::path::Path) -> PackagingJob {
        PackagingJob {
            stream_id: "abc_1".to_string(),
            source: StreamSource::Url("http://127.0.0.1:9000/torrents/x/files/1/stream".to_string()),
            output_dir: dir.to_path_buf(),
            playlist_path: dir.join("playlist.m3u8"),
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_command_uses_stream_copy_hls() {
        let packager = FfmpegHlsPackager::new(PackagerConfig::default());
        let dir = PathBuf::from("/tmp/hls/abc_1");
        let args = args(&packager.build_command(&job(&dir)));

        let position = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[position("-i") + 1], "http://127.0.0.1:9000/torrents/x/files/1/stream");
        assert_eq!(args[position("-c:v") + 1], "copy");
        assert_eq!(args[position("-c:a") + 1], "copy");
        assert_eq!(args[position("-hls_time") + 1], "10");
        assert_eq!(args[position("-hls_list_size") + 1], "6");
        assert_eq!(args[position("-hls_flags") + 1], "delete_segments");
        assert_eq!(args[position("-f") + 1], "hls");
        assert_eq!(args.last().unwrap(), "/tmp/hls/abc_1/playlist.m3u8");
    }

    #[test]
    fn test_command_keeps_segments_when_configured() {
        let packager = FfmpegHlsPackager::new(PackagerConfig {
            delete_old_segments: false,
            ..Default::default()
        });
        let args = args(&packager.build_command(&job(&PathBuf::from("/tmp/hls/x"))));
        assert!(!args.iter().any(|a| a == "-hls_flags"));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let packager = FfmpegHlsPackager::new(PackagerConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/swarmcast-ffmpeg"),
            startup_grace: Duration::from_millis(10),
            ..Default::default()
        });
        let dir = tempfile::tempdir().unwrap();

        assert!(!packager.is_available());
        let result = packager.start(job(dir.path())).await;
        assert!(matches!(result, Err(PackagingError::SpawnFailed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_description() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(describe_status(ExitStatus::from_raw(1 << 8)), "exit code 1");
        assert_eq!(describe_status(ExitStatus::from_raw(9)), "signal termination");
    }
}
