//! Swarm Engine capability boundary.
//!
//! The peer-to-peer transfer itself is performed by an external engine. This
//! module defines the narrow interface the orchestrator consumes: open a
//! descriptor, inspect its file table, select one file, read live counters,
//! re-announce, expose a byte endpoint, and destroy.

pub mod descriptor;
pub mod media;
pub mod remote;

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use descriptor::ContentDescriptor;
pub use media::{MEDIA_EXTENSIONS, MediaFileRef, is_media_file, media_files};
pub use remote::RemoteSwarmEngine;

/// One entry of a swarm resource's file table, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmFile {
    /// Ordinal position in the engine's file table
    pub index: usize,
    pub name: String,
    /// Length in bytes
    pub length: u64,
    /// Path relative to the resource root
    pub path: String,
}

/// Live transfer counters for one swarm handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmCounters {
    pub bytes_downloaded: u64,
    pub peer_count: u32,
    /// Bytes per second
    pub download_rate: u64,
    /// Bytes per second
    pub upload_rate: u64,
}

impl SwarmCounters {
    /// True when real payload bytes have arrived.
    pub fn has_data(&self) -> bool {
        self.bytes_downloaded > 0
    }

    /// True when the swarm has neither peers nor data.
    pub fn is_stalled(&self) -> bool {
        self.peer_count == 0 && self.bytes_downloaded == 0
    }
}

/// Readable byte endpoint for one file, suitable as packager input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    /// HTTP endpoint served by the engine
    Url(String),
    /// Local file being written by the engine
    Path(PathBuf),
}

impl StreamSource {
    /// Returns the value passed to the packager as its input argument.
    pub fn as_input(&self) -> OsString {
        match self {
            StreamSource::Url(url) => OsString::from(url),
            StreamSource::Path(path) => path.clone().into_os_string(),
        }
    }
}

impl std::fmt::Display for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamSource::Url(url) => write!(f, "{url}"),
            StreamSource::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Errors reported by swarm engines.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("Invalid content descriptor: {reason}")]
    InvalidDescriptor { reason: String },

    #[error("Swarm metadata unavailable: {reason}")]
    MetadataUnavailable { reason: String },

    #[error("File index {index} out of range ({file_count} files)")]
    FileIndexOutOfRange { index: usize, file_count: usize },

    #[error("Swarm daemon rejected request: {reason}")]
    Daemon { reason: String },

    #[error("Swarm engine failed: {reason}")]
    EngineFailed { reason: String },

    #[error("Swarm handle already destroyed")]
    Destroyed,

    #[error("Invalid daemon URL")]
    UrlParsing(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SwarmError {
    /// Whether the handle that produced this error can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SwarmError::EngineFailed { .. } | SwarmError::Destroyed
        )
    }
}

/// Factory that turns a content descriptor into a live swarm handle.
#[async_trait]
pub trait SwarmEngine: Send + Sync {
    /// Starts acquisition and resolves once the file table is known.
    ///
    /// # Errors
    /// - `SwarmError::InvalidDescriptor` - Engine cannot interpret the descriptor
    /// - `SwarmError::MetadataUnavailable` - Metadata could not be resolved
    /// - `SwarmError::Http` - Transport failure talking to a remote engine
    async fn open(&self, descriptor: &ContentDescriptor)
    -> Result<Arc<dyn SwarmHandle>, SwarmError>;

    /// Short identifier used in logs.
    fn engine_type(&self) -> &'static str;
}

/// Counter access needed by the readiness gate and metrics sampler.
#[async_trait]
pub trait SwarmStats: Send + Sync {
    /// Reads the current transfer counters.
    ///
    /// # Errors
    /// - `SwarmError::EngineFailed` - Engine hit an unrecoverable failure
    /// - `SwarmError::Destroyed` - Handle was destroyed
    async fn counters(&self) -> Result<SwarmCounters, SwarmError>;

    /// Asks the engine to announce to its trackers again.
    ///
    /// # Errors
    /// - `SwarmError::Destroyed` - Handle was destroyed
    async fn reannounce(&self) -> Result<(), SwarmError>;
}

/// Live acquisition of one swarm resource. Exclusively owned by one session.
#[async_trait]
pub trait SwarmHandle: SwarmStats {
    /// The resource's full file table in engine order.
    fn files(&self) -> Vec<SwarmFile>;

    /// Selects `index` and deselects every other file.
    ///
    /// # Errors
    /// - `SwarmError::FileIndexOutOfRange` - No file at `index`
    async fn select_exclusive(&self, index: usize) -> Result<(), SwarmError>;

    /// Per-file selection flags in engine order.
    ///
    /// # Errors
    /// - `SwarmError::Destroyed` - Handle was destroyed
    async fn selection(&self) -> Result<Vec<bool>, SwarmError>;

    /// Waits for the file's byte endpoint to be available and returns it.
    ///
    /// # Errors
    /// - `SwarmError::FileIndexOutOfRange` - No file at `index`
    /// - `SwarmError::EngineFailed` - Endpoint could not be started
    async fn stream_source(&self, index: usize) -> Result<StreamSource, SwarmError>;

    /// Stops the transfer and releases engine resources. Idempotent.
    ///
    /// # Errors
    /// - `SwarmError::Http` - Remote engine could not be reached
    async fn destroy(&self) -> Result<(), SwarmError>;
}
