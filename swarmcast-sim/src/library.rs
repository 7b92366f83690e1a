//! Local media library exposed as a swarm engine for development.
//!
//! Each video file found under the library directory becomes a one-file
//! torrent with a deterministic magnet link. Opening that magnet yields a
//! simulated handle whose stream source is the real file on disk, so the
//! production FFmpeg packager can run against it.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use swarmcast_core::config::SimulationConfig;
use swarmcast_core::swarm::{
    ContentDescriptor, SwarmEngine, SwarmError, SwarmFile, SwarmHandle, is_media_file,
};

use crate::swarm::{SimulatedSwarmHandle, SourceLayout, SwarmBehavior};

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &[".Trash", ".localized", ".tvlibrary", ".tvdb", ".git"];

/// One video file in the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryMovie {
    pub path: PathBuf,
    /// File name including extension
    pub name: String,
    pub size: u64,
    /// Hex SHA-1 of the file path
    pub info_hash: String,
}

impl LibraryMovie {
    fn new(path: PathBuf, size: u64) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Unknown Movie".to_string());
        let info_hash = hex::encode(Sha1::digest(path.to_string_lossy().as_bytes()));
        Self {
            path,
            name,
            size,
            info_hash,
        }
    }

    /// Magnet link that opens this movie through [`LibrarySwarmEngine`].
    pub fn magnet_link(&self) -> String {
        format!(
            "magnet:?xt=urn:btih:{}&dn={}",
            self.info_hash,
            urlencoding::encode(&self.name)
        )
    }
}

/// Swarm engine serving files from a local directory.
pub struct LibrarySwarmEngine {
    movies: HashMap<String, LibraryMovie>,
    config: SimulationConfig,
}

impl LibrarySwarmEngine {
    /// Scans `dir` recursively for video files.
    ///
    /// # Errors
    /// - `std::io::Error` - Library directory could not be read
    pub async fn scan(dir: &Path, config: SimulationConfig) -> Result<Self, std::io::Error> {
        let mut movies = HashMap::new();
        scan_directory(dir, &mut movies).await?;
        tracing::info!(
            library = %dir.display(),
            movies = movies.len(),
            "Scanned local media library"
        );
        Ok(Self { movies, config })
    }

    /// All movies, sorted by name.
    pub fn movies(&self) -> Vec<&LibraryMovie> {
        let mut movies: Vec<_> = self.movies.values().collect();
        movies.sort_by(|a, b| a.name.cmp(&b.name));
        movies
    }

    pub fn movie(&self, info_hash: &str) -> Option<&LibraryMovie> {
        self.movies.get(&info_hash.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }
}

fn scan_directory<'a>(
    dir: &'a Path,
    movies: &'a mut HashMap<String, LibraryMovie>,
) -> Pin<Box<dyn Future<Output = Result<(), std::io::Error>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                let skipped = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| SKIPPED_DIRS.contains(&n));
                if skipped {
                    continue;
                }
                if let Err(e) = scan_directory(&path, movies).await {
                    tracing::warn!("Failed to scan {}: {}", path.display(), e);
                }
            } else if file_type.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(is_media_file)
            {
                let size = entry.metadata().await?.len();
                let movie = LibraryMovie::new(path, size);
                movies.insert(movie.info_hash.clone(), movie);
            }
        }
        Ok(())
    })
}

#[async_trait]
impl SwarmEngine for LibrarySwarmEngine {
    async fn open(
        &self,
        descriptor: &ContentDescriptor,
    ) -> Result<Arc<dyn SwarmHandle>, SwarmError> {
        let info_hash = descriptor
            .info_hash()
            .ok_or_else(|| SwarmError::InvalidDescriptor {
                reason: "magnet link has no btih info hash".to_string(),
            })?;
        let movie = self
            .movie(info_hash)
            .ok_or_else(|| SwarmError::MetadataUnavailable {
                reason: format!("no library movie with info hash {info_hash}"),
            })?;

        tokio::time::sleep(self.config.metadata_delay).await;

        let files = vec![SwarmFile {
            index: 0,
            name: movie.name.clone(),
            length: movie.size,
            path: movie.name.clone(),
        }];
        tracing::debug!(movie = %movie.name, "Opened library movie");

        Ok(Arc::new(SimulatedSwarmHandle::new(
            files,
            SwarmBehavior::Healthy,
            SourceLayout::Local(vec![movie.path.clone()]),
            &self.config,
        )))
    }

    fn engine_type(&self) -> &'static str {
        "library"
    }
}
