//! Swarmcast Simulation - Offline swarms and packagers for development.
//!
//! Provides in-process stand-ins for the remote swarm daemon and FFmpeg so
//! the full stream lifecycle can run without network access or external
//! binaries.
//!
//! - [`SimulatedSwarm`]: scripted torrents with deterministic counters
//! - [`LibrarySwarmEngine`]: local video files exposed as one-file torrents
//! - [`SimulatedPackager`]: writes placeholder HLS output on a timer
//!
//! ```rust,no_run
//! use swarmcast_core::config::SimulationConfig;
//! use swarmcast_sim::{SimulatedSwarm, SimulatedTorrent, SwarmBehavior};
//!
//! let swarm = SimulatedSwarm::new(SimulationConfig::default()).with_torrent(
//!     "magnet:?xt=urn:btih:abc",
//!     SimulatedTorrent::sample("Big Buck Bunny").with_behavior(SwarmBehavior::NoPeers),
//! );
//! # drop(swarm);
//! ```

pub mod library;
pub mod packager;
pub mod swarm;

pub use library::{LibraryMovie, LibrarySwarmEngine};
pub use packager::{PackagerFault, SimulatedPackager};
pub use swarm::{SimulatedSwarm, SimulatedSwarmHandle, SimulatedTorrent, SwarmBehavior};
