//! Centralized configuration for Swarmcast.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Swarmcast components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct SwarmcastConfig {
    pub session: SessionConfig,
    pub readiness: ReadinessConfig,
    pub metrics: MetricsConfig,
    pub packager: PackagerConfig,
    pub server: ServerConfig,
    pub swarm: SwarmConfig,
    pub simulation: SimulationConfig,
}

/// Session lifecycle timing.
///
/// Controls how long sessions may sit unselected and how long swarm
/// discovery may take before a listing request fails.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle window after listing before an unselected session is destroyed
    pub idle_timeout: Duration,
    /// Maximum time to wait for the swarm to resolve its file table
    pub discovery_timeout: Duration,
    /// Maximum time teardown waits for the packager task to wind down
    pub teardown_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300), // 5 minutes
            discovery_timeout: Duration::from_secs(30),
            teardown_grace: Duration::from_secs(5),
        }
    }
}

/// Readiness gate polling policy.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Interval between swarm counter polls
    pub poll_interval: Duration,
    /// Hard wall-clock budget for the whole wait
    pub overall_timeout: Duration,
    /// Number of re-announce attempts allowed while stalled
    pub retry_budget: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            overall_timeout: Duration::from_secs(45),
            retry_budget: 3,
        }
    }
}

/// Background metrics sampling for active sessions.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Interval between swarm counter samples
    pub sample_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
        }
    }
}

/// Segment packager (FFmpeg HLS muxer) configuration.
#[derive(Debug, Clone)]
pub struct PackagerConfig {
    /// FFmpeg binary to execute
    pub ffmpeg_path: PathBuf,
    /// Target duration of each media segment
    pub segment_duration: Duration,
    /// Number of segments kept in the rolling playlist
    pub playlist_size: u32,
    /// Whether segments falling out of the playlist are deleted
    pub delete_old_segments: bool,
    /// Time the packager must stay alive before startup is acknowledged
    pub startup_grace: Duration,
    /// Root directory holding one subdirectory per stream
    pub output_root: PathBuf,
    /// Manifest file name inside each stream directory
    pub playlist_name: &'static str,
    /// URL prefix under which `output_root` is served
    pub public_prefix: String,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            segment_duration: Duration::from_secs(10),
            playlist_size: 6,
            delete_old_segments: true,
            startup_grace: Duration::from_millis(750),
            output_root: PathBuf::from("public/hls"),
            playlist_name: "playlist.m3u8",
            public_prefix: "/hls".to_string(),
        }
    }
}

/// HTTP API listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Remote swarm daemon connection settings.
///
/// Used in production mode where an external daemon performs the actual
/// peer-to-peer transfer.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Base URL of the swarm daemon API
    pub daemon_url: String,
    /// Timeout for individual daemon requests
    pub request_timeout: Duration,
    /// Interval between metadata polls while waiting for the file table
    pub metadata_poll_interval: Duration,
    /// User agent for daemon requests
    pub user_agent: &'static str,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            daemon_url: "http://127.0.0.1:9000".to_string(),
            request_timeout: Duration::from_secs(10),
            metadata_poll_interval: Duration::from_millis(500),
            user_agent: "swarmcast/0.1.0",
        }
    }
}

/// Simulation mode configuration for testing and development.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Deterministic seed for reproducible simulations
    pub deterministic_seed: Option<u64>,
    /// Peers reported by simulated swarms once connected
    pub simulated_peers: u32,
    /// Simulated download speed in bytes per second
    pub simulated_download_speed: u64,
    /// Delay before simulated metadata resolves
    pub metadata_delay: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            simulated_peers: 12,
            simulated_download_speed: 2_097_152, // 2 MB/s
            metadata_delay: Duration::from_millis(200),
        }
    }
}

impl SwarmcastConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("SWARMCAST_HOST") {
            config.server.host = host;
        }

        if let Some(port) = parse_env::<u16>("SWARMCAST_PORT") {
            config.server.port = port;
        }

        if let Some(seconds) = parse_env::<u64>("SWARMCAST_IDLE_TIMEOUT") {
            config.session.idle_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = parse_env::<u64>("SWARMCAST_READINESS_TIMEOUT") {
            config.readiness.overall_timeout = Duration::from_secs(seconds);
        }

        if let Some(budget) = parse_env::<u32>("SWARMCAST_RETRY_BUDGET") {
            config.readiness.retry_budget = budget;
        }

        if let Ok(path) = std::env::var("SWARMCAST_FFMPEG_PATH") {
            config.packager.ffmpeg_path = PathBuf::from(path);
        }

        if let Ok(dir) = std::env::var("SWARMCAST_HLS_DIR") {
            config.packager.output_root = PathBuf::from(dir);
        }

        if let Ok(url) = std::env::var("SWARMCAST_SWARM_URL") {
            config.swarm.daemon_url = url;
        }

        if let Some(seed) = parse_env::<u64>("SWARMCAST_SIMULATION_SEED") {
            config.simulation.deterministic_seed = Some(seed);
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Every interval is shrunk so lifecycle tests complete in milliseconds.
    pub fn for_testing() -> Self {
        Self {
            session: SessionConfig {
                idle_timeout: Duration::from_millis(500),
                discovery_timeout: Duration::from_millis(500),
                teardown_grace: Duration::from_millis(500),
            },
            readiness: ReadinessConfig {
                poll_interval: Duration::from_millis(20),
                overall_timeout: Duration::from_millis(600),
                retry_budget: 3,
            },
            metrics: MetricsConfig {
                sample_interval: Duration::from_millis(20),
            },
            packager: PackagerConfig {
                startup_grace: Duration::from_millis(50),
                ..Default::default()
            },
            simulation: SimulationConfig {
                deterministic_seed: Some(42),
                metadata_delay: Duration::ZERO,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = SwarmcastConfig::default();

        assert_eq!(config.session.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.session.discovery_timeout, Duration::from_secs(30));
        assert_eq!(config.readiness.poll_interval, Duration::from_secs(1));
        assert_eq!(config.readiness.overall_timeout, Duration::from_secs(45));
        assert_eq!(config.readiness.retry_budget, 3);
        assert_eq!(config.packager.segment_duration, Duration::from_secs(10));
        assert_eq!(config.packager.playlist_size, 6);
        assert!(config.packager.delete_old_segments);
        assert_eq!(config.packager.playlist_name, "playlist.m3u8");
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_testing_preset_is_fast() {
        let config = SwarmcastConfig::for_testing();

        assert!(config.readiness.poll_interval < Duration::from_millis(100));
        assert!(config.readiness.overall_timeout < Duration::from_secs(1));
        assert_eq!(config.simulation.deterministic_seed, Some(42));
        assert_eq!(config.simulation.metadata_delay, Duration::ZERO);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("SWARMCAST_PORT", "8080");
            std::env::set_var("SWARMCAST_IDLE_TIMEOUT", "60");
            std::env::set_var("SWARMCAST_RETRY_BUDGET", "5");
            std::env::set_var("SWARMCAST_HLS_DIR", "/tmp/swarmcast-hls");
            std::env::set_var("SWARMCAST_SIMULATION_SEED", "not-a-number");
        }

        let config = SwarmcastConfig::from_env();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.session.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.readiness.retry_budget, 5);
        assert_eq!(
            config.packager.output_root,
            PathBuf::from("/tmp/swarmcast-hls")
        );
        assert_eq!(config.simulation.deterministic_seed, None);

        unsafe {
            std::env::remove_var("SWARMCAST_PORT");
            std::env::remove_var("SWARMCAST_IDLE_TIMEOUT");
            std::env::remove_var("SWARMCAST_RETRY_BUDGET");
            std::env::remove_var("SWARMCAST_HLS_DIR");
            std::env::remove_var("SWARMCAST_SIMULATION_SEED");
        }
    }
}
