//! Segment packager abstraction for both production and simulation modes
//!
//! A packager reads a progressively downloading source and writes a rolling
//! HLS playlist plus segment files into a per-stream directory.

pub mod ffmpeg;
pub mod progress;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

pub use ffmpeg::FfmpegHlsPackager;
pub use progress::PackagerProgress;

use crate::swarm::StreamSource;

/// Progress shared between a running packager and status readers.
pub type SharedProgress = Arc<Mutex<PackagerProgress>>;

/// Input and output locations for one packaging run.
#[derive(Debug, Clone)]
pub struct PackagingJob {
    /// Stream identifier, used for logging
    pub stream_id: String,
    pub source: StreamSource,
    /// Directory receiving the playlist and segments
    pub output_dir: PathBuf,
    /// Full path of the playlist inside `output_dir`
    pub playlist_path: PathBuf,
}

/// Abstraction over segment packagers to enable both real and simulated runs
#[async_trait]
pub trait SegmentPackager: Send + Sync {
    /// Launches packaging and returns once startup is acknowledged.
    ///
    /// # Errors
    /// - `PackagingError::SpawnFailed` - Process could not be launched
    /// - `PackagingError::ExitedDuringStartup` - Process died before acknowledging
    async fn start(&self, job: PackagingJob) -> Result<Box<dyn PackagingProcess>, PackagingError>;

    /// Check if the packager can run in this environment
    fn is_available(&self) -> bool;
}

/// A running packaging process.
#[async_trait]
pub trait PackagingProcess: Send {
    /// Resolves when the process exits.
    ///
    /// # Errors
    /// - `PackagingError::Crashed` - Process exited with a failure status
    async fn wait(&mut self) -> Result<(), PackagingError>;

    /// Terminates the process. Succeeds if it has already exited.
    ///
    /// # Errors
    /// - `PackagingError::StopFailed` - Process could not be signalled
    async fn stop(&mut self) -> Result<(), PackagingError>;

    /// Live progress parsed from the process output, when available.
    fn progress(&self) -> Option<SharedProgress> {
        None
    }
}

/// Errors that can occur while packaging a stream
#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    #[error("Failed to launch packager: {reason}")]
    SpawnFailed { reason: String },

    #[error("Packager exited during startup with {status}: {stderr_tail}")]
    ExitedDuringStartup { status: String, stderr_tail: String },

    #[error("Packager exited with {status}: {stderr_tail}")]
    Crashed { status: String, stderr_tail: String },

    #[error("Failed to stop packager: {reason}")]
    StopFailed { reason: String },

    #[error("I/O error during {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}
