//! Scripted in-process swarm engine.
//!
//! Torrents are registered per descriptor together with a behavior script
//! that decides what the counters report over time. Counters are derived from
//! time elapsed since selection, so paused-clock tests are deterministic.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use swarmcast_core::config::SimulationConfig;
use swarmcast_core::swarm::{
    ContentDescriptor, StreamSource, SwarmCounters, SwarmEngine, SwarmError, SwarmFile,
    SwarmHandle, SwarmStats,
};
use tokio::time::Instant;

/// How a simulated swarm evolves after selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmBehavior {
    /// Peers connect and data flows at the configured speed
    Healthy,
    /// No peers ever appear
    NoPeers,
    /// Peers connect but never send data
    PeersWithoutData,
    /// Behaves like `NoPeers` until this many re-announces, then `Healthy`
    RecoversAfterReannounce(u32),
    /// Healthy until this long after selection, then reports engine failure
    FailsAfter(Duration),
}

/// A torrent the simulated swarm knows how to open.
#[derive(Debug, Clone)]
pub struct SimulatedTorrent {
    pub name: String,
    /// File names and lengths in engine order
    pub files: Vec<(String, u64)>,
    pub behavior: SwarmBehavior,
}

impl SimulatedTorrent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: Vec::new(),
            behavior: SwarmBehavior::Healthy,
        }
    }

    pub fn with_file(mut self, name: impl Into<String>, length: u64) -> Self {
        self.files.push((name.into(), length));
        self
    }

    pub fn with_behavior(mut self, behavior: SwarmBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Torrent served for descriptors without a scripted entry.
    pub fn sample(name: &str) -> Self {
        Self::new(name)
            .with_file(format!("{name}.mp4"), 734_003_200)
            .with_file(format!("{name}.srt"), 48_213)
            .with_file("README.txt", 1_024)
            .with_file("Sample/sample.mkv", 12_582_912)
    }

    pub(crate) fn swarm_files(&self) -> Vec<SwarmFile> {
        self.files
            .iter()
            .enumerate()
            .map(|(index, (path, length))| SwarmFile {
                index,
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                length: *length,
                path: format!("{}/{path}", self.name),
            })
            .collect()
    }
}

/// In-process swarm engine driven by scripted torrents.
pub struct SimulatedSwarm {
    config: SimulationConfig,
    torrents: Mutex<HashMap<String, SimulatedTorrent>>,
    default_behavior: SwarmBehavior,
    opened: Mutex<Vec<Arc<SimulatedSwarmHandle>>>,
}

impl SimulatedSwarm {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            torrents: Mutex::new(HashMap::new()),
            default_behavior: SwarmBehavior::Healthy,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Registers the torrent returned for `descriptor`.
    pub fn with_torrent(self, descriptor: &str, torrent: SimulatedTorrent) -> Self {
        self.torrents
            .lock()
            .insert(descriptor.trim().to_string(), torrent);
        self
    }

    /// Behavior of torrents generated for unknown descriptors.
    pub fn with_default_behavior(mut self, behavior: SwarmBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    /// Every handle opened so far, for inspection in tests.
    pub fn opened_handles(&self) -> Vec<Arc<SimulatedSwarmHandle>> {
        self.opened.lock().clone()
    }

    fn resolve(&self, descriptor: &ContentDescriptor) -> SimulatedTorrent {
        if let Some(torrent) = self.torrents.lock().get(descriptor.as_str()) {
            return torrent.clone();
        }
        let name = descriptor.display_name().unwrap_or("Simulated Movie");
        SimulatedTorrent::sample(name).with_behavior(self.default_behavior)
    }
}

#[async_trait]
impl SwarmEngine for SimulatedSwarm {
    async fn open(
        &self,
        descriptor: &ContentDescriptor,
    ) -> Result<Arc<dyn SwarmHandle>, SwarmError> {
        tokio::time::sleep(self.config.metadata_delay).await;

        let torrent = self.resolve(descriptor);
        tracing::debug!(
            torrent = %torrent.name,
            files = torrent.files.len(),
            behavior = ?torrent.behavior,
            "Simulated swarm resolved metadata"
        );

        let handle = Arc::new(SimulatedSwarmHandle::new(
            torrent.swarm_files(),
            torrent.behavior,
            SourceLayout::Synthetic(
                descriptor
                    .info_hash()
                    .map_or_else(|| torrent.name.clone(), str::to_string),
            ),
            &self.config,
        ));
        self.opened.lock().push(Arc::clone(&handle));
        Ok(handle)
    }

    fn engine_type(&self) -> &'static str {
        "simulated"
    }
}

/// Where a simulated handle's bytes come from.
#[derive(Debug, Clone)]
pub(crate) enum SourceLayout {
    /// No real bytes, identified by a label
    Synthetic(String),
    /// One local file per engine file index
    Local(Vec<PathBuf>),
}

#[derive(Debug, Default)]
struct SelectionState {
    flags: Vec<bool>,
    selected: Option<usize>,
    selected_at: Option<Instant>,
}

/// Handle returned by the simulated engines.
pub struct SimulatedSwarmHandle {
    files: Vec<SwarmFile>,
    behavior: SwarmBehavior,
    layout: SourceLayout,
    peers: u32,
    speed: u64,
    selection: Mutex<SelectionState>,
    rng: Mutex<ChaCha8Rng>,
    reannounces: AtomicU32,
    destroyed: AtomicBool,
}

impl SimulatedSwarmHandle {
    pub(crate) fn new(
        files: Vec<SwarmFile>,
        behavior: SwarmBehavior,
        layout: SourceLayout,
        config: &SimulationConfig,
    ) -> Self {
        let seed = config.deterministic_seed.unwrap_or_else(rand::random);
        let selection = SelectionState {
            flags: vec![true; files.len()],
            ..Default::default()
        };
        Self {
            files,
            behavior,
            layout,
            peers: config.simulated_peers.max(1),
            speed: config.simulated_download_speed,
            selection: Mutex::new(selection),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            reannounces: AtomicU32::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn reannounce_count(&self) -> u32 {
        self.reannounces.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Index currently selected, if any.
    pub fn selected_index(&self) -> Option<usize> {
        self.selection.lock().selected
    }

    fn ensure_alive(&self) -> Result<(), SwarmError> {
        if self.is_destroyed() {
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

    fn flowing(&self, since_selection: Duration, target_length: u64) -> SwarmCounters {
        let mut rng = self.rng.lock();
        let jitter = rng.random_range(0.9..1.1);
        let rate = (self.speed as f64 * jitter) as u64;
        let downloaded = ((self.speed as f64 * since_selection.as_secs_f64()) as u64).min(target_length);
        let complete = downloaded >= target_length;

        SwarmCounters {
            bytes_downloaded: downloaded,
            peer_count: self.peers,
            download_rate: if complete { 0 } else { rate },
            upload_rate: rate / 20,
        }
    }
}

#[async_trait]
impl SwarmStats for SimulatedSwarmHandle {
    async fn counters(&self) -> Result<SwarmCounters, SwarmError> {
        self.ensure_alive()?;

        let (selected, selected_at) = {
            let selection = self.selection.lock();
            (selection.selected, selection.selected_at)
        };
        let Some((index, selected_at)) = selected.zip(selected_at) else {
            // Metadata peers only, nothing requested yet
            return Ok(SwarmCounters {
                peer_count: match self.behavior {
                    SwarmBehavior::NoPeers | SwarmBehavior::RecoversAfterReannounce(_) => 0,
                    _ => self.peers,
                },
                ..Default::default()
            });
        };

        let elapsed = selected_at.elapsed();
        let target = self.files[index].length;

        match self.behavior {
            SwarmBehavior::Healthy => Ok(self.flowing(elapsed, target)),
            SwarmBehavior::NoPeers => Ok(SwarmCounters::default()),
            SwarmBehavior::PeersWithoutData => Ok(SwarmCounters {
                peer_count: self.peers,
                ..Default::default()
            }),
            SwarmBehavior::RecoversAfterReannounce(needed) => {
                if self.reannounce_count() >= needed {
                    Ok(self.flowing(elapsed, target))
                } else {
                    Ok(SwarmCounters::default())
                }
            }
            SwarmBehavior::FailsAfter(limit) => {
                if elapsed >= limit {
                    Err(SwarmError::EngineFailed {
                        reason: "simulated swarm failure".to_string(),
                    })
                } else {
                    Ok(self.flowing(elapsed, target))
                }
            }
        }
    }

    async fn reannounce(&self) -> Result<(), SwarmError> {
        self.ensure_alive()?;
        let attempt = self.reannounces.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(attempt, "Simulated re-announce");
        Ok(())
    }
}

#[async_trait]
impl SwarmHandle for SimulatedSwarmHandle {
    fn files(&self) -> Vec<SwarmFile> {
        self.files.clone()
    }

    async fn select_exclusive(&self, index: usize) -> Result<(), SwarmError> {
        self.ensure_alive()?;
        self.check_index(index)?;

        let mut selection = self.selection.lock();
        for (i, flag) in selection.flags.iter_mut().enumerate() {
            *flag = i == index;
        }
        if selection.selected != Some(index) {
            selection.selected = Some(index);
            selection.selected_at = Some(Instant::now());
        }
        Ok(())
    }

    async fn selection(&self) -> Result<Vec<bool>, SwarmError> {
        self.ensure_alive()?;
        Ok(self.selection.lock().flags.clone())
    }

    async fn stream_source(&self, index: usize) -> Result<StreamSource, SwarmError> {
        self.ensure_alive()?;
        self.check_index(index)?;

        match &self.layout {
            SourceLayout::Synthetic(label) => {
                Ok(StreamSource::Url(format!("sim://{label}/files/{index}")))
            }
            SourceLayout::Local(paths) => paths
                .get(index)
                .cloned()
                .map(StreamSource::Path)
                .ok_or(SwarmError::EngineFailed {
                    reason: format!("no local file for index {index}"),
                }),
        }
    }

    async fn destroy(&self) -> Result<(), SwarmError> {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Simulated swarm destroyed");
        }
        Ok(())
    }
}
