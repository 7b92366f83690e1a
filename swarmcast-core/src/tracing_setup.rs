//! Log output for the server and CLI.
//!
//! The console shows what the operator asked for. A trace file next to it
//! records every session transition, readiness poll and FFmpeg line of the
//! latest run.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Trace file written inside the logs directory, replaced on every run.
pub const TRACE_FILE_NAME: &str = "swarmcast-last-run.log";

/// HTTP plumbing that floods the console at debug level.
const NOISY_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "tower_http"];

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Cannot prepare trace file {path}")]
    TraceFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Global subscriber already installed")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs the console and trace-file layers.
///
/// `RUST_LOG` replaces the console filter when set. The file layer always
/// records everything at TRACE. Returns the trace file path.
///
/// # Errors
/// - `TracingError::TraceFile` - Logs directory or file could not be created
/// - `TracingError::AlreadyInitialized` - Called twice in one process
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> Result<PathBuf, TracingError> {
    let logs_dir = logs_dir.unwrap_or_else(|| Path::new("logs"));
    let trace_path = logs_dir.join(TRACE_FILE_NAME);
    let trace_file = create_dir_all(logs_dir)
        .and_then(|()| File::create(&trace_path))
        .map_err(|source| TracingError::TraceFile {
            path: trace_path.clone(),
            source,
        })?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directives(console_level)));

    let console = fmt::layer()
        .with_target(console_level >= Level::DEBUG)
        .compact()
        .with_filter(console_filter);

    let trace = fmt::layer()
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(trace_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console)
        .with(trace)
        .try_init()?;

    tracing::debug!(console = %console_level, trace_file = %trace_path.display(), "Logging ready");
    Ok(trace_path)
}

/// Console filter for `level`, keeping HTTP internals at WARN unless tracing.
fn console_directives(level: Level) -> String {
    let mut directives = level.to_string().to_lowercase();
    if level < Level::TRACE {
        for target in NOISY_TARGETS {
            directives.push_str(&format!(",{target}=warn"));
        }
    }
    directives
}

/// `--log-level` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    /// Includes per-poll readiness and sampler output
    Trace,
}

impl CliLogLevel {
    /// Converts CLI log level to tracing Level enum.
    ///
    /// # Examples
    /// ```
    /// use swarmcast_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(CliLogLevel::Debug.as_tracing_level(), tracing::Level::DEBUG);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_tracing_level().to_string().to_lowercase())
    }
}
