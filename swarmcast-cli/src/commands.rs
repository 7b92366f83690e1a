//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Subcommand;
use swarmcast_core::orchestrator::TeardownReason;
use swarmcast_core::swarm::RemoteSwarmEngine;
use swarmcast_core::{
    FfmpegHlsPackager, RuntimeMode, SegmentPackager, StreamOrchestrator, SwarmEngine,
    SwarmcastConfig,
};
use swarmcast_sim::{LibrarySwarmEngine, SimulatedPackager, SimulatedSwarm};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming API server
    Server {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
        /// Runtime mode (production, development)
        #[arg(long, default_value = "development")]
        mode: RuntimeMode,
        /// Local media directory served as torrents in development mode
        #[arg(long)]
        library: Option<PathBuf>,
        /// Directory receiving HLS output
        #[arg(long)]
        hls_dir: Option<PathBuf>,
        /// Swarm daemon base URL for production mode
        #[arg(long)]
        swarm_url: Option<String>,
    },
    /// List the media files behind a magnet link
    Inspect {
        /// Magnet link to resolve
        magnet: String,
        /// Runtime mode (production, development)
        #[arg(long, default_value = "development")]
        mode: RuntimeMode,
        /// Local media directory served as torrents in development mode
        #[arg(long)]
        library: Option<PathBuf>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the first failure of the command, with context
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Server {
            host,
            port,
            mode,
            library,
            hls_dir,
            swarm_url,
        } => {
            let mut config = SwarmcastConfig::from_env();
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = hls_dir {
                config.packager.output_root = dir;
            }
            if let Some(url) = swarm_url {
                config.swarm.daemon_url = url;
            }
            start_server(config, mode, library).await
        }
        Commands::Inspect {
            magnet,
            mode,
            library,
        } => inspect(SwarmcastConfig::from_env(), mode, library, &magnet).await,
    }
}

/// Swarm engine and packager chosen for a run.
pub struct Backends {
    pub swarm: Arc<dyn SwarmEngine>,
    pub packager: Arc<dyn SegmentPackager>,
}

/// Picks implementations for the runtime mode.
///
/// # Errors
/// - Remote swarm daemon URL is invalid
/// - Library directory could not be scanned
pub async fn select_backends(
    config: &SwarmcastConfig,
    mode: RuntimeMode,
    library: Option<PathBuf>,
) -> anyhow::Result<Backends> {
    let backends = match (mode, library) {
        (RuntimeMode::Production, _) => {
            let swarm = RemoteSwarmEngine::new(config.swarm.clone())
                .context("Failed to configure swarm daemon client")?;
            Backends {
                swarm: Arc::new(swarm),
                packager: Arc::new(FfmpegHlsPackager::new(config.packager.clone())),
            }
        }
        (RuntimeMode::Development, Some(dir)) => {
            let library = LibrarySwarmEngine::scan(&dir, config.simulation.clone())
                .await
                .with_context(|| format!("Failed to scan library {}", dir.display()))?;

            if library.is_empty() {
                println!("No video files found in {}", dir.display());
            } else {
                println!("Library movies ({}):", library.movies().len());
                for movie in library.movies() {
                    println!("  {}", movie.name);
                    println!("    {}", movie.magnet_link());
                }
            }

            Backends {
                swarm: Arc::new(library),
                packager: Arc::new(FfmpegHlsPackager::new(config.packager.clone())),
            }
        }
        (RuntimeMode::Development, None) => Backends {
            swarm: Arc::new(SimulatedSwarm::new(config.simulation.clone())),
            packager: Arc::new(SimulatedPackager::new(Duration::from_secs(2))),
        },
    };

    if !backends.packager.is_available() {
        tracing::warn!(
            ffmpeg = %config.packager.ffmpeg_path.display(),
            "FFmpeg not found, stream requests will fail to package"
        );
    }

    Ok(backends)
}

/// Run the API server until Ctrl-C
///
/// # Errors
/// - Backends could not be created
/// - Server failed to bind or crashed
pub async fn start_server(
    config: SwarmcastConfig,
    mode: RuntimeMode,
    library: Option<PathBuf>,
) -> anyhow::Result<()> {
    let backends = select_backends(&config, mode, library).await?;
    tracing::info!(
        mode = %mode,
        swarm = backends.swarm.engine_type(),
        "Starting Swarmcast server"
    );

    let orchestrator = StreamOrchestrator::new(config, backends.swarm, backends.packager);
    swarmcast_web::run_server(orchestrator, mode)
        .await
        .context("Server failed")?;
    Ok(())
}

/// Resolve a magnet link once and print its media files
///
/// # Errors
/// - Backends could not be created
/// - Discovery failed or found no media files
pub async fn inspect(
    config: SwarmcastConfig,
    mode: RuntimeMode,
    library: Option<PathBuf>,
    magnet: &str,
) -> anyhow::Result<()> {
    let backends = select_backends(&config, mode, library).await?;
    let orchestrator = StreamOrchestrator::new(config, backends.swarm, backends.packager);

    let listing = orchestrator
        .list_files(magnet)
        .await
        .context("Failed to list media files")?;

    println!("Session {}", listing.session_id);
    println!("{:-<72}", "");
    println!("{:>5}  {:>10}  Name", "Index", "Size");
    for file in &listing.files {
        println!(
            "{:>5}  {:>10}  {}",
            file.index,
            format_size(file.length),
            file.path
        );
    }

    orchestrator
        .destroy_session(&listing.session_id, TeardownReason::ClientRequest)
        .await;
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const MB: f64 = 1_048_576.0;
    const GB: f64 = 1_073_741_824.0;

    let bytes = bytes as f64;
    if bytes >= GB {
        format!("{:.2} GB", bytes / GB)
    } else {
        format!("{:.1} MB", bytes / MB)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: Commands,
    }

    #[test]
    fn test_server_arguments_parse() {
        let cli = TestCli::try_parse_from([
            "swarmcast",
            "server",
            "--port",
            "8080",
            "--mode",
            "prod",
            "--swarm-url",
            "http://10.0.0.2:9000",
        ])
        .unwrap();

        match cli.command {
            Commands::Server {
                port,
                mode,
                swarm_url,
                library,
                ..
            } => {
                assert_eq!(port, Some(8080));
                assert_eq!(mode, RuntimeMode::Production);
                assert_eq!(swarm_url.as_deref(), Some("http://10.0.0.2:9000"));
                assert!(library.is_none());
            }
            Commands::Inspect { .. } => panic!("expected server command"),
        }
    }

    #[test]
    fn test_invalid_mode_is_rejected() {
        assert!(TestCli::try_parse_from(["swarmcast", "inspect", "magnet:?", "--mode", "staging"]).is_err());
    }

    #[tokio::test]
    async fn test_backend_selection() {
        let config = SwarmcastConfig::for_testing();

        let dev = select_backends(&config, RuntimeMode::Development, None)
            .await
            .unwrap();
        assert_eq!(dev.swarm.engine_type(), "simulated");
        assert!(dev.packager.is_available());

        let prod = select_backends(&config, RuntimeMode::Production, None)
            .await
            .unwrap();
        assert_eq!(prod.swarm.engine_type(), "remote");
    }

    #[tokio::test]
    async fn test_library_backend() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("clip.mp4"), b"data")
            .await
            .unwrap();

        let backends = select_backends(
            &SwarmcastConfig::for_testing(),
            RuntimeMode::Development,
            Some(dir.path().to_path_buf()),
        )
        .await
        .unwrap();
        assert_eq!(backends.swarm.engine_type(), "library");
    }

    #[tokio::test]
    async fn test_inspect_development_magnet() {
        let magnet = "magnet:?xt=urn:btih:c9e15763f722f23e98a29decdfae341b98d53056&dn=Demo";
        inspect(SwarmcastConfig::for_testing(), RuntimeMode::Development, None, magnet)
            .await
            .unwrap();
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(1_048_576), "1.0 MB");
        assert_eq!(format_size(734_003_200), "700.0 MB");
        assert_eq!(format_size(2_147_483_648), "2.00 GB");
    }
}
