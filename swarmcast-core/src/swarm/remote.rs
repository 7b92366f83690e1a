//! HTTP client for an external swarm daemon.
//!
//! The daemon owns the peer-to-peer transfer. Swarmcast adds a resource,
//! waits for its file table, toggles file selection, reads counters, and
//! consumes the daemon's per-file byte endpoint as packager input.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    ContentDescriptor, StreamSource, SwarmCounters, SwarmEngine, SwarmError, SwarmFile,
    SwarmHandle, SwarmStats,
};
use crate::config::SwarmConfig;

#[derive(Debug, Serialize)]
struct AddTorrentRequest<'a> {
    link: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddTorrentResponse {
    info_hash: String,
}

#[derive(Debug, Deserialize)]
struct TorrentInfo {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    files: Vec<TorrentFileEntry>,
}

#[derive(Debug, Deserialize)]
struct TorrentFileEntry {
    name: String,
    length: u64,
    path: String,
    #[serde(default)]
    selected: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    downloaded: u64,
    peers: u32,
    download_speed: u64,
    upload_speed: u64,
}

/// Swarm engine backed by a swarm daemon's REST API.
pub struct RemoteSwarmEngine {
    client: reqwest::Client,
    base_url: String,
    config: SwarmConfig,
}

impl RemoteSwarmEngine {
    /// Creates a client for the daemon at `config.daemon_url`.
    ///
    /// # Errors
    /// - `SwarmError::UrlParsing` - Daemon URL is malformed
    /// - `SwarmError::Http` - HTTP client could not be built
    pub fn new(config: SwarmConfig) -> Result<Self, SwarmError> {
        url::Url::parse(&config.daemon_url)?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent)
            .build()?;

        Ok(Self {
            client,
            base_url: config.daemon_url.trim_end_matches('/').to_string(),
            config,
        })
    }

    async fn fetch_info(&self, torrent_url: &str) -> Result<TorrentInfo, SwarmError> {
        let info = self
            .client
            .get(torrent_url)
            .send()
            .await?
            .error_for_status()?
            .json::<TorrentInfo>()
            .await?;
        Ok(info)
    }
}

#[async_trait]
impl SwarmEngine for RemoteSwarmEngine {
    async fn open(
        &self,
        descriptor: &ContentDescriptor,
    ) -> Result<Arc<dyn SwarmHandle>, SwarmError> {
        let response = self
            .client
            .post(format!("{}/torrents", self.base_url))
            .json(&AddTorrentRequest {
                link: descriptor.as_str(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SwarmError::InvalidDescriptor {
                reason: format!("daemon returned {status}: {body}"),
            });
        }

        let added: AddTorrentResponse = response.json().await?;
        let torrent_url = format!("{}/torrents/{}", self.base_url, added.info_hash);
        tracing::debug!(
            info_hash = %added.info_hash,
            "Daemon accepted descriptor, waiting for metadata"
        );

        // Removes the daemon-side torrent if we are dropped or fail before
        // handing out a handle
        let mut guard = PendingTorrent::new(self.client.clone(), torrent_url.clone());

        let files = loop {
            let info = self.fetch_info(&torrent_url).await?;
            if info.ready {
                break info
                    .files
                    .into_iter()
                    .enumerate()
                    .map(|(index, entry)| SwarmFile {
                        index,
                        name: entry.name,
                        length: entry.length,
                        path: entry.path,
                    })
                    .collect::<Vec<_>>();
            }
            tokio::time::sleep(self.config.metadata_poll_interval).await;
        };

        guard.disarm();
        tracing::info!(
            info_hash = %added.info_hash,
            file_count = files.len(),
            "Swarm metadata resolved"
        );

        Ok(Arc::new(RemoteSwarmHandle {
            client: self.client.clone(),
            torrent_url,
            files,
            destroyed: AtomicBool::new(false),
        }))
    }

    fn engine_type(&self) -> &'static str {
        "remote"
    }
}

/// Deletes a half-opened torrent unless disarmed.
struct PendingTorrent {
    client: reqwest::Client,
    torrent_url: String,
    armed: bool,
}

impl PendingTorrent {
    fn new(client: reqwest::Client, torrent_url: String) -> Self {
        Self {
            client,
            torrent_url,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingTorrent {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        let url = std::mem::take(&mut self.torrent_url);
        runtime.spawn(async move {
            if let Err(e) = client.delete(&url).send().await {
                tracing::warn!(url = %url, error = %e, "Failed to remove abandoned torrent");
            }
        });
    }
}

/// One torrent held by the daemon.
pub struct RemoteSwarmHandle {
    client: reqwest::Client,
    torrent_url: String,
    files: Vec<SwarmFile>,
    destroyed: AtomicBool,
}

impl RemoteSwarmHandle {
    fn ensure_alive(&self) -> Result<(), SwarmError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(SwarmError::Destroyed);
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), SwarmError> {
        if index >= self.files.len() {
            return Err(SwarmError::FileIndexOutOfRange {
                index,
                file_count: self.files.len(),
            });
        }
        Ok(())
    }

    async fn post(&self, path: &str) -> Result<(), SwarmError> {
        let response = self
            .client
            .post(format!("{}/{path}", self.torrent_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SwarmError::Daemon {
                reason: format!("POST {path} returned {}", response.status()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SwarmStats for RemoteSwarmHandle {
    async fn counters(&self) -> Result<SwarmCounters, SwarmError> {
        self.ensure_alive()?;

        let response = self
            .client
            .get(format!("{}/stats", self.torrent_url))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SwarmError::EngineFailed {
                reason: "daemon no longer tracks this torrent".to_string(),
            });
        }

        let stats: StatsResponse = response.error_for_status()?.json().await?;
        Ok(SwarmCounters {
            bytes_downloaded: stats.downloaded,
            peer_count: stats.peers,
            download_rate: stats.download_speed,
            upload_rate: stats.upload_speed,
        })
    }

    async fn reannounce(&self) -> Result<(), SwarmError> {
        self.ensure_alive()?;
        self.post("announce").await
    }
}

#[async_trait]
impl SwarmHandle for RemoteSwarmHandle {
    fn files(&self) -> Vec<SwarmFile> {
        self.files.clone()
    }

    async fn select_exclusive(&self, index: usize) -> Result<(), SwarmError> {
        self.ensure_alive()?;
        self.check_index(index)?;

        for file in &self.files {
            let action = if file.index == index {
                "select"
            } else {
                "deselect"
            };
            self.post(&format!("files/{}/{action}", file.index)).await?;
        }
        Ok(())
    }

    async fn selection(&self) -> Result<Vec<bool>, SwarmError> {
        self.ensure_alive()?;
        let info = self
            .client
            .get(&self.torrent_url)
            .send()
            .await?
            .error_for_status()?
            .json::<TorrentInfo>()
            .await?;
        Ok(info.files.iter().map(|file| file.selected).collect())
    }

    async fn stream_source(&self, index: usize) -> Result<StreamSource, SwarmError> {
        self.ensure_alive()?;
        self.check_index(index)?;
        Ok(StreamSource::Url(format!(
            "{}/files/{index}/stream",
            self.torrent_url
        )))
    }

    async fn destroy(&self) -> Result<(), SwarmError> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let response = self.client.delete(&self.torrent_url).send().await?;
        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(SwarmError::Daemon {
                reason: format!("DELETE returned {status}"),
            });
        }
        tracing::debug!(torrent = %self.torrent_url, "Removed torrent from daemon");
        Ok(())
    }
}
