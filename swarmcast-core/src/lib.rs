//! Swarmcast Core - Stream session orchestration
//!
//! Turns a swarm content descriptor into a live HLS stream: list the media
//! files, select one, wait until the swarm delivers data, package it into a
//! rolling playlist, report progress, and tear everything down again.

pub mod config;
pub mod mode;
pub mod orchestrator;
pub mod packager;
pub mod readiness;
pub mod session;
pub mod status;
pub mod swarm;
pub mod tracing_setup;

#[cfg(test)]
pub(crate) mod test_mocks;

// Re-export main types for convenient access
pub use config::SwarmcastConfig;
pub use mode::RuntimeMode;
pub use orchestrator::{FileListing, StreamOrchestrator, TeardownReason, TeardownReport};
pub use packager::{FfmpegHlsPackager, PackagingError, SegmentPackager};
pub use readiness::{ReadinessError, ReadinessGate};
pub use session::{ErrorClass, SessionError, SessionId, SessionState, StreamId, StreamTicket};
pub use status::StatusReport;
pub use swarm::{ContentDescriptor, MediaFileRef, SwarmEngine, SwarmError, SwarmHandle};
